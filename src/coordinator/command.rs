//! Commands delivered to the agreement bot by the rest of the system

use serde::{Deserialize, Serialize};

use crate::domain::{Policy, ProposalReply};
use crate::protocol::TerminationReason;

/// A decoded protocol message received from a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolMessage {
    /// Answer to one of our proposals
    Reply(ProposalReply),
    /// The device cancelled the agreement on its side
    Cancel {
        agreement_id: String,
        device_id: String,
        reason_code: u32,
    },
}

/// A blockchain event observed by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainEvent {
    pub chain_type: String,
    pub chain_name: String,
    pub raw_event: String,
}

/// An agreement bot blockchain account received funds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFundedEvent {
    pub account: String,
    pub chain_type: String,
    pub chain_name: String,
}

/// Inbound commands. Each protocol variant decides which it accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgbotCommand {
    NewProtocolMessage {
        protocol: String,
        message: ProtocolMessage,
    },
    AgreementTimeout {
        agreement_id: String,
        protocol: String,
        reason: TerminationReason,
    },
    PolicyChanged {
        policy: Policy,
    },
    PolicyDeleted {
        policy_name: String,
        org: String,
    },
    WorkloadUpgrade {
        device_id: String,
        policy_name: String,
        agreement_id: Option<String>,
    },
    MakeAgreement {
        device_id: String,
        organization: String,
        policy_name: String,
    },
    BlockchainEvent(BlockchainEvent),
    AccountFunded(AccountFundedEvent),
    /// Commands raised by subsystems this bot has no handler for
    Unknown {
        kind: String,
    },
}

impl AgbotCommand {
    /// Short name for logs
    pub fn kind(&self) -> &str {
        match self {
            AgbotCommand::NewProtocolMessage { .. } => "NewProtocolMessage",
            AgbotCommand::AgreementTimeout { .. } => "AgreementTimeout",
            AgbotCommand::PolicyChanged { .. } => "PolicyChanged",
            AgbotCommand::PolicyDeleted { .. } => "PolicyDeleted",
            AgbotCommand::WorkloadUpgrade { .. } => "WorkloadUpgrade",
            AgbotCommand::MakeAgreement { .. } => "MakeAgreement",
            AgbotCommand::BlockchainEvent(_) => "BlockchainEvent",
            AgbotCommand::AccountFunded(_) => "AccountFunded",
            AgbotCommand::Unknown { kind } => kind,
        }
    }
}

impl Default for AgbotCommand {
    fn default() -> Self {
        AgbotCommand::Unknown {
            kind: String::new(),
        }
    }
}
