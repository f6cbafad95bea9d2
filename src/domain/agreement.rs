//! Agreement record and lifecycle state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::proposal::Proposal;

/// Lifecycle state of a persisted agreement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementState {
    /// Proposal sent, waiting for the device to reply
    Proposed,
    /// Device accepted the proposal and the reply has been recorded
    Accepted,
    /// Agreement ended; terminal, no further mutation allowed
    Terminated,
}

impl std::fmt::Display for AgreementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgreementState::Proposed => write!(f, "proposed"),
            AgreementState::Accepted => write!(f, "accepted"),
            AgreementState::Terminated => write!(f, "terminated"),
        }
    }
}

/// A persisted agreement between this bot and a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agreement {
    pub agreement_id: String,
    pub device_id: String,
    pub organization: String,
    pub protocol: String,
    /// Consumer policy the proposal was built from
    pub policy_name: String,
    pub policy_hash: String,
    pub proposal_hash: String,
    /// Consumer's signature over the proposal hash
    pub proposal_signature: String,
    /// Device's signature, set once when its reply is recorded
    pub counterparty_signature: Option<String>,
    pub creation_time: DateTime<Utc>,
    pub reply_time: Option<DateTime<Utc>>,
    pub terminated_time: Option<DateTime<Utc>>,
    pub termination_code: Option<u32>,
    pub termination_reason: Option<String>,
    /// Seconds between data verification checks
    pub data_verification_check_rate: u32,
    /// Number of verification checks that found no data
    pub data_verification_missed_count: u64,
    pub state: AgreementState,
    /// The proposal exactly as it was sent
    pub proposal: Proposal,
}

impl Agreement {
    /// Build a fresh record from an accepted-for-sending proposal
    pub fn from_proposal(proposal: &Proposal, protocol: &str) -> Self {
        Self {
            agreement_id: proposal.agreement_id.clone(),
            device_id: proposal.device_id.clone(),
            organization: proposal.organization.clone(),
            protocol: protocol.to_string(),
            policy_name: proposal.policy.name.clone(),
            policy_hash: proposal.policy.hash(),
            proposal_hash: proposal.hash.clone(),
            proposal_signature: proposal.signature.clone(),
            counterparty_signature: None,
            creation_time: Utc::now(),
            reply_time: None,
            terminated_time: None,
            termination_code: None,
            termination_reason: None,
            data_verification_check_rate: proposal
                .policy
                .data_verification
                .as_ref()
                .map(|dv| dv.check_rate_secs)
                .unwrap_or(0),
            data_verification_missed_count: 0,
            state: AgreementState::Proposed,
            proposal: proposal.clone(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state == AgreementState::Terminated
    }

    /// Live agreements are the ones a policy or upgrade event may still cancel
    pub fn is_live(&self) -> bool {
        !self.is_terminated()
    }
}
