//! Agreement persistence
//!
//! The durable key-value store lives outside this crate; `AgreementStore` is
//! the contract the coordinator needs from it. `MemoryAgreementStore` backs
//! the binary and the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::domain::{Agreement, AgreementState, ProposalReply};
use crate::error::{AgbotError, Result};

/// Storage contract for agreement records. Implementations must tolerate
/// concurrent access from every worker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgreementStore: Send + Sync {
    /// Persist a new record; fails if the id is already taken
    async fn create_agreement(&self, record: Agreement) -> Result<()>;

    /// Record a device reply against an existing, live agreement
    async fn record_reply(&self, agreement_id: &str, reply: &ProposalReply) -> Result<()>;

    /// Mark an agreement terminated with the protocol code and its description
    async fn mark_terminated(&self, agreement_id: &str, reason_code: u32, reason: &str)
        -> Result<()>;

    async fn find_agreement(&self, agreement_id: &str) -> Result<Option<Agreement>>;

    /// Remove a record that never reached the device
    async fn delete_agreement(&self, agreement_id: &str) -> Result<()>;

    /// Every non-terminated agreement made under the named policy
    async fn live_agreements_for_policy(&self, policy_name: &str) -> Result<Vec<Agreement>>;

    /// Proposals still awaiting a reply that were created before `cutoff`
    async fn proposals_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Agreement>>;
}

/// In-process agreement store
#[derive(Debug, Default)]
pub struct MemoryAgreementStore {
    agreements: DashMap<String, Agreement>,
}

impl MemoryAgreementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.agreements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agreements.is_empty()
    }
}

#[async_trait]
impl AgreementStore for MemoryAgreementStore {
    async fn create_agreement(&self, record: Agreement) -> Result<()> {
        match self.agreements.entry(record.agreement_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(AgbotError::DuplicateAgreement(record.agreement_id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(agreement_id = %record.agreement_id, "Created agreement record");
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn record_reply(&self, agreement_id: &str, reply: &ProposalReply) -> Result<()> {
        let mut ag = self
            .agreements
            .get_mut(agreement_id)
            .ok_or_else(|| AgbotError::AgreementNotFound(agreement_id.to_string()))?;

        if ag.is_terminated() {
            return Err(AgbotError::AgreementTerminated(agreement_id.to_string()));
        }
        if ag.counterparty_signature.is_some() {
            return Err(AgbotError::Validation(format!(
                "reply already recorded for agreement {agreement_id}"
            )));
        }

        ag.reply_time = Some(Utc::now());
        if reply.accepted {
            ag.counterparty_signature = Some(reply.signature.clone());
            ag.state = AgreementState::Accepted;
        }
        Ok(())
    }

    async fn mark_terminated(
        &self,
        agreement_id: &str,
        reason_code: u32,
        reason: &str,
    ) -> Result<()> {
        let mut ag = self
            .agreements
            .get_mut(agreement_id)
            .ok_or_else(|| AgbotError::AgreementNotFound(agreement_id.to_string()))?;

        if ag.is_terminated() {
            return Err(AgbotError::AgreementTerminated(agreement_id.to_string()));
        }

        ag.state = AgreementState::Terminated;
        ag.terminated_time = Some(Utc::now());
        ag.termination_code = Some(reason_code);
        ag.termination_reason = Some(reason.to_string());
        Ok(())
    }

    async fn find_agreement(&self, agreement_id: &str) -> Result<Option<Agreement>> {
        Ok(self.agreements.get(agreement_id).map(|ag| ag.clone()))
    }

    async fn delete_agreement(&self, agreement_id: &str) -> Result<()> {
        self.agreements
            .remove(agreement_id)
            .map(|_| ())
            .ok_or_else(|| AgbotError::AgreementNotFound(agreement_id.to_string()))
    }

    async fn live_agreements_for_policy(&self, policy_name: &str) -> Result<Vec<Agreement>> {
        Ok(self
            .agreements
            .iter()
            .filter(|ag| ag.policy_name == policy_name && ag.is_live())
            .map(|ag| ag.clone())
            .collect())
    }

    async fn proposals_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Agreement>> {
        Ok(self
            .agreements
            .iter()
            .filter(|ag| ag.state == AgreementState::Proposed && ag.creation_time < cutoff)
            .map(|ag| ag.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Policy, Proposal};
    use tokio_test::{assert_err, assert_ok};

    fn record(id: &str) -> Agreement {
        let proposal = Proposal::new(id, "D1", "acme", Policy::new("netspeed", "acme"), "k").unwrap();
        Agreement::from_proposal(&proposal, "Basic")
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let store = MemoryAgreementStore::new();
        assert_ok!(store.create_agreement(record("A1")).await);

        let err = assert_err!(store.create_agreement(record("A1")).await);
        assert!(matches!(err, AgbotError::DuplicateAgreement(id) if id == "A1"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_reply_requires_existing_agreement() {
        let store = MemoryAgreementStore::new();
        let reply = ProposalReply::accept("missing", "D1", "sig");

        let err = store.record_reply("missing", &reply).await.unwrap_err();
        assert!(matches!(err, AgbotError::AgreementNotFound(_)));
    }

    #[tokio::test]
    async fn test_accepted_reply_sets_signature_once() {
        let store = MemoryAgreementStore::new();
        store.create_agreement(record("A1")).await.unwrap();

        let reply = ProposalReply::accept("A1", "D1", "sig");
        assert_ok!(store.record_reply("A1", &reply).await);
        assert_err!(store.record_reply("A1", &reply).await);

        let ag = store.find_agreement("A1").await.unwrap().unwrap();
        assert_eq!(ag.state, AgreementState::Accepted);
        assert_eq!(ag.counterparty_signature.as_deref(), Some("sig"));
    }

    #[tokio::test]
    async fn test_terminated_is_final() {
        let store = MemoryAgreementStore::new();
        store.create_agreement(record("A1")).await.unwrap();
        store.mark_terminated("A1", 204, "policy changed").await.unwrap();

        let reply = ProposalReply::accept("A1", "D1", "sig");
        assert!(matches!(
            store.record_reply("A1", &reply).await,
            Err(AgbotError::AgreementTerminated(_))
        ));
        assert!(matches!(
            store.mark_terminated("A1", 201, "no reply").await,
            Err(AgbotError::AgreementTerminated(_))
        ));

        let ag = store.find_agreement("A1").await.unwrap().unwrap();
        assert_eq!(ag.termination_code, Some(204));
        assert!(store.live_agreements_for_policy("netspeed").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_only_old_unanswered_proposals_are_stale() {
        let store = MemoryAgreementStore::new();
        let cutoff = Utc::now();

        for id in ["old", "old-accepted", "old-terminated"] {
            let mut ag = record(id);
            ag.creation_time = cutoff - chrono::Duration::seconds(30);
            store.create_agreement(ag).await.unwrap();
        }
        let mut new = record("new");
        new.creation_time = cutoff + chrono::Duration::seconds(1);
        store.create_agreement(new).await.unwrap();

        let reply = ProposalReply::accept("old-accepted", "D1", "sig");
        store.record_reply("old-accepted", &reply).await.unwrap();
        store.mark_terminated("old-terminated", 201, "no reply").await.unwrap();

        let stale = store.proposals_created_before(cutoff).await.unwrap();
        let ids: Vec<_> = stale.iter().map(|ag| ag.agreement_id.as_str()).collect();
        assert_eq!(ids, vec!["old"]);
    }
}
