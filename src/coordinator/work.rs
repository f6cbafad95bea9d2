//! Work items consumed by the negotiation workers

use crate::domain::{Policy, ProposalReply};

/// Everything needed to open a negotiation with one device
#[derive(Debug, Clone, PartialEq)]
pub struct InitiateAgreement {
    pub device_id: String,
    pub organization: String,
    pub policy: Policy,
}

/// One negotiation step. Items are independent of each other apart from the
/// per-agreement lock.
#[derive(Debug, Clone, PartialEq)]
pub enum AgreementWork {
    InitiateAgreement(InitiateAgreement),
    HandleReply(ProposalReply),
    /// `device_id` is set when the device itself asked for the cancellation
    CancelAgreement {
        agreement_id: String,
        reason_code: u32,
        device_id: Option<String>,
    },
    PolicyChanged(Policy),
    PolicyDeleted {
        policy_name: String,
    },
    WorkloadUpgrade {
        device_id: String,
        policy_name: String,
        agreement_id: Option<String>,
    },
}

impl AgreementWork {
    pub fn kind(&self) -> &'static str {
        match self {
            AgreementWork::InitiateAgreement(_) => "InitiateAgreement",
            AgreementWork::HandleReply(_) => "HandleReply",
            AgreementWork::CancelAgreement { .. } => "CancelAgreement",
            AgreementWork::PolicyChanged(_) => "PolicyChanged",
            AgreementWork::PolicyDeleted { .. } => "PolicyDeleted",
            AgreementWork::WorkloadUpgrade { .. } => "WorkloadUpgrade",
        }
    }

    /// The agreement this item targets, when known before processing
    pub fn agreement_id(&self) -> Option<&str> {
        match self {
            AgreementWork::HandleReply(reply) => Some(&reply.agreement_id),
            AgreementWork::CancelAgreement { agreement_id, .. } => Some(agreement_id),
            AgreementWork::WorkloadUpgrade { agreement_id, .. } => agreement_id.as_deref(),
            _ => None,
        }
    }
}
