//! Device addressing and messaging
//!
//! Endpoint lookup and delivery go through the exchange in production.
//! The in-memory versions here keep a static registry and record every
//! message they are asked to send.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::Proposal;
use crate::error::{AgbotError, Result};

/// Where and how to reach a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub public_key: Vec<u8>,
}

/// Resolves a device id to its communication endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageTargetResolver: Send + Sync {
    async fn resolve_endpoint(&self, device_id: &str, worker_id: &str) -> Result<Endpoint>;
}

/// An addressable device, ready to receive messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTarget {
    pub device_id: String,
    pub address: String,
    pub public_key: Vec<u8>,
}

impl MessageTarget {
    pub fn new(device_id: &str, endpoint: Endpoint) -> Result<Self> {
        if endpoint.address.is_empty() {
            return Err(AgbotError::MessageTarget {
                device_id: device_id.to_string(),
                reason: "empty message address".to_string(),
            });
        }
        if endpoint.public_key.is_empty() {
            return Err(AgbotError::MessageTarget {
                device_id: device_id.to_string(),
                reason: "empty public key".to_string(),
            });
        }
        Ok(Self {
            device_id: device_id.to_string(),
            address: endpoint.address,
            public_key: endpoint.public_key,
        })
    }
}

/// Delivers protocol messages to devices
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceMessenger: Send + Sync {
    async fn send_proposal(&self, target: &MessageTarget, proposal: &Proposal) -> Result<()>;

    async fn send_cancel(
        &self,
        target: &MessageTarget,
        agreement_id: &str,
        reason_code: u32,
    ) -> Result<()>;
}

/// Static device registry
#[derive(Debug, Default)]
pub struct StaticEndpointResolver {
    endpoints: DashMap<String, Endpoint>,
    lookups: DashMap<String, usize>,
}

impl StaticEndpointResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, device_id: &str, endpoint: Endpoint) {
        self.endpoints.insert(device_id.to_string(), endpoint);
    }

    /// How many times a device has been looked up
    pub fn lookups(&self, device_id: &str) -> usize {
        self.lookups.get(device_id).map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl MessageTargetResolver for StaticEndpointResolver {
    async fn resolve_endpoint(&self, device_id: &str, worker_id: &str) -> Result<Endpoint> {
        *self.lookups.entry(device_id.to_string()).or_insert(0) += 1;
        debug!(worker_id, device_id, "Resolving device endpoint");

        self.endpoints
            .get(device_id)
            .map(|ep| ep.clone())
            .ok_or_else(|| AgbotError::EndpointResolution {
                device_id: device_id.to_string(),
                reason: "device is not registered".to_string(),
            })
    }
}

/// A message handed to the messenger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Proposal {
        device_id: String,
        agreement_id: String,
    },
    Cancel {
        device_id: String,
        agreement_id: String,
        reason_code: u32,
    },
}

/// Messenger that records instead of delivering
#[derive(Debug, Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<SentMessage>>,
    unreachable: DashSet<String>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery to this device fail
    pub fn mark_unreachable(&self, device_id: &str) {
        self.unreachable.insert(device_id.to_string());
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    fn check_reachable(&self, target: &MessageTarget) -> Result<()> {
        if self.unreachable.contains(&target.device_id) {
            return Err(AgbotError::MessageDelivery(format!(
                "device {} unreachable at {}",
                target.device_id, target.address
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceMessenger for RecordingMessenger {
    async fn send_proposal(&self, target: &MessageTarget, proposal: &Proposal) -> Result<()> {
        self.check_reachable(target)?;
        self.sent.lock().await.push(SentMessage::Proposal {
            device_id: target.device_id.clone(),
            agreement_id: proposal.agreement_id.clone(),
        });
        Ok(())
    }

    async fn send_cancel(
        &self,
        target: &MessageTarget,
        agreement_id: &str,
        reason_code: u32,
    ) -> Result<()> {
        self.check_reachable(target)?;
        self.sent.lock().await.push(SentMessage::Cancel {
            device_id: target.device_id.clone(),
            agreement_id: agreement_id.to_string(),
            reason_code,
        });
        Ok(())
    }
}
