//! Routines shared by every consumer protocol variant
//!
//! Holds the collaborators (store, exchange, messenger, policies) and the
//! protocol-independent halves of persistence and termination.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::policy::PolicyManager;
use super::work::InitiateAgreement;
use crate::adapters::{
    AgreementStore, DeviceMessenger, Endpoint, MessageTarget, MessageTargetResolver,
    ProtocolRecorder,
};
use crate::domain::{Agreement, Policy, Proposal, ProposalReply};
use crate::error::{AgbotError, Result};
use crate::protocol::TerminationCodec;

/// External collaborators shared by every protocol variant
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn AgreementStore>,
    pub policies: Arc<PolicyManager>,
    pub resolver: Arc<dyn MessageTargetResolver>,
    pub messenger: Arc<dyn DeviceMessenger>,
    pub recorder: Arc<dyn ProtocolRecorder>,
}

pub struct BaseConsumerProtocolHandler {
    name: String,
    agbot_id: String,
    token: String,
    store: Arc<dyn AgreementStore>,
    policies: Arc<PolicyManager>,
    resolver: Arc<dyn MessageTargetResolver>,
    messenger: Arc<dyn DeviceMessenger>,
}

impl BaseConsumerProtocolHandler {
    pub fn new(name: &str, agbot_id: &str, token: &str, collaborators: &Collaborators) -> Self {
        Self {
            name: name.to_string(),
            agbot_id: agbot_id.to_string(),
            token: token.to_string(),
            store: collaborators.store.clone(),
            policies: collaborators.policies.clone(),
            resolver: collaborators.resolver.clone(),
            messenger: collaborators.messenger.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn agbot_id(&self) -> &str {
        &self.agbot_id
    }

    /// Key used to sign proposals
    pub fn signing_key(&self) -> &str {
        &self.token
    }

    pub fn store(&self) -> &Arc<dyn AgreementStore> {
        &self.store
    }

    pub fn policies(&self) -> &Arc<PolicyManager> {
        &self.policies
    }

    /// Create the durable record for a proposal about to be sent
    pub async fn persist_base_agreement(
        &self,
        wi: &InitiateAgreement,
        proposal: &Proposal,
        worker_id: &str,
    ) -> Result<()> {
        if wi.device_id != proposal.device_id {
            return Err(AgbotError::Validation(format!(
                "proposal for device {} does not match work item device {}",
                proposal.device_id, wi.device_id
            )));
        }

        let record = Agreement::from_proposal(proposal, &self.name);
        self.store.create_agreement(record).await?;

        info!(
            protocol = %self.name,
            worker_id,
            agreement_id = %proposal.agreement_id,
            device_id = %wi.device_id,
            policy = %wi.policy.name,
            "Persisted agreement"
        );
        Ok(())
    }

    /// Record a reply; the agreement must exist and belong to `policy`
    pub async fn persist_reply(
        &self,
        reply: &ProposalReply,
        policy: &Policy,
        worker_id: &str,
    ) -> Result<()> {
        let agreement = self
            .store
            .find_agreement(&reply.agreement_id)
            .await?
            .ok_or_else(|| AgbotError::AgreementNotFound(reply.agreement_id.clone()))?;

        if agreement.policy_name != policy.name {
            return Err(AgbotError::Validation(format!(
                "reply for agreement {} names policy {}, agreement was made under {}",
                reply.agreement_id, policy.name, agreement.policy_name
            )));
        }

        self.store.record_reply(&reply.agreement_id, reply).await?;
        debug!(
            protocol = %self.name,
            worker_id,
            agreement_id = %reply.agreement_id,
            accepted = reply.accepted,
            "Persisted reply"
        );
        Ok(())
    }

    pub async fn get_device_message_endpoint(
        &self,
        device_id: &str,
        worker_id: &str,
    ) -> Result<Endpoint> {
        self.resolver.resolve_endpoint(device_id, worker_id).await
    }

    /// Resolve the device and hand it the proposal
    pub async fn send_proposal(&self, proposal: &Proposal, worker_id: &str) -> Result<()> {
        let endpoint = self
            .get_device_message_endpoint(&proposal.device_id, worker_id)
            .await?;
        let target = MessageTarget::new(&proposal.device_id, endpoint)?;
        self.messenger.send_proposal(&target, proposal).await?;

        debug!(
            protocol = %self.name,
            worker_id,
            agreement_id = %proposal.agreement_id,
            device_id = %proposal.device_id,
            "Sent proposal"
        );
        Ok(())
    }

    /// Shared termination sequence: mark the record terminated, then notify
    /// the device on a best-effort basis. A missing target skips the notice.
    pub async fn terminate_agreement(
        &self,
        agreement: &Agreement,
        reason_code: u32,
        target: Option<MessageTarget>,
        worker_id: &str,
        codec: &dyn TerminationCodec,
    ) {
        let reason = codec.get_termination_reason(reason_code);

        match self
            .store
            .mark_terminated(&agreement.agreement_id, reason_code, &reason)
            .await
        {
            Ok(()) => info!(
                protocol = %self.name,
                worker_id,
                agreement_id = %agreement.agreement_id,
                device_id = %agreement.device_id,
                reason_code,
                reason = %reason,
                "Terminated agreement"
            ),
            Err(e) => error!(
                protocol = %self.name,
                worker_id,
                agreement_id = %agreement.agreement_id,
                error = %e,
                "Error marking agreement terminated"
            ),
        }

        let Some(target) = target else {
            warn!(
                protocol = %self.name,
                worker_id,
                agreement_id = %agreement.agreement_id,
                device_id = %agreement.device_id,
                "No message target, device not notified of cancellation"
            );
            return;
        };

        if let Err(e) = self
            .messenger
            .send_cancel(&target, &agreement.agreement_id, reason_code)
            .await
        {
            warn!(
                protocol = %self.name,
                worker_id,
                agreement_id = %agreement.agreement_id,
                device_id = %agreement.device_id,
                error = %e,
                "Error sending cancel message"
            );
        }
    }
}

impl std::fmt::Debug for BaseConsumerProtocolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseConsumerProtocolHandler")
            .field("name", &self.name)
            .field("agbot_id", &self.agbot_id)
            .finish_non_exhaustive()
    }
}
