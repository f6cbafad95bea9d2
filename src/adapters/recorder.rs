//! Protocol-level agreement bookkeeping
//!
//! Separate from durable persistence: this registers an accepted agreement
//! with the negotiation protocol's own records.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::{Policy, Proposal, ProposalReply};
use crate::error::{AgbotError, Result};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProtocolRecorder: Send + Sync {
    async fn record_agreement(
        &self,
        proposal: &Proposal,
        reply: &ProposalReply,
        consumer_policy: &Policy,
        organization: &str,
    ) -> Result<()>;
}

/// In-process recorder keyed by agreement id
#[derive(Debug, Default)]
pub struct MemoryProtocolRecorder {
    recorded: DashMap<String, String>,
}

impl MemoryProtocolRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Organization the agreement was recorded under, if recorded
    pub fn recorded_org(&self, agreement_id: &str) -> Option<String> {
        self.recorded.get(agreement_id).map(|org| org.clone())
    }
}

#[async_trait]
impl ProtocolRecorder for MemoryProtocolRecorder {
    async fn record_agreement(
        &self,
        proposal: &Proposal,
        reply: &ProposalReply,
        consumer_policy: &Policy,
        organization: &str,
    ) -> Result<()> {
        if reply.agreement_id != proposal.agreement_id {
            return Err(AgbotError::ProtocolRecord(format!(
                "reply for {} does not match proposal {}",
                reply.agreement_id, proposal.agreement_id
            )));
        }
        if !reply.accepted {
            return Err(AgbotError::ProtocolRecord(format!(
                "cannot record rejected agreement {}",
                proposal.agreement_id
            )));
        }
        if consumer_policy.name != proposal.policy.name {
            return Err(AgbotError::ProtocolRecord(format!(
                "policy {} does not match proposal policy {}",
                consumer_policy.name, proposal.policy.name
            )));
        }

        match self.recorded.entry(proposal.agreement_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AgbotError::ProtocolRecord(
                format!("agreement {} already recorded", proposal.agreement_id),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(organization.to_string());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_once() {
        let recorder = MemoryProtocolRecorder::new();
        let policy = Policy::new("netspeed", "acme");
        let proposal = Proposal::new("A1", "D1", "acme", policy.clone(), "k").unwrap();
        let reply = ProposalReply::accept("A1", "D1", "sig");

        recorder
            .record_agreement(&proposal, &reply, &policy, "acme")
            .await
            .unwrap();
        assert_eq!(recorder.recorded_org("A1").as_deref(), Some("acme"));
        assert!(recorder
            .record_agreement(&proposal, &reply, &policy, "acme")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_mismatched_reply_rejected() {
        let recorder = MemoryProtocolRecorder::new();
        let policy = Policy::new("netspeed", "acme");
        let proposal = Proposal::new("A1", "D1", "acme", policy.clone(), "k").unwrap();
        let reply = ProposalReply::accept("A2", "D1", "sig");

        let err = recorder
            .record_agreement(&proposal, &reply, &policy, "acme")
            .await
            .unwrap_err();
        assert!(matches!(err, AgbotError::ProtocolRecord(_)));
    }
}
