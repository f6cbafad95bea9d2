//! Consumer protocol handler contract
//!
//! Every agreement protocol the bot speaks implements `ConsumerProtocolHandler`.
//! Variants differ in their cancel-code table, their blockchain policy and
//! their cancellation gate; the workers only ever see this trait.

use async_trait::async_trait;

use super::termination::{codes, TerminationReason};
use crate::coordinator::command::{AccountFundedEvent, AgbotCommand, BlockchainEvent};
use crate::coordinator::work::InitiateAgreement;
use crate::domain::{Agreement, Meter, MeteringNotification, Policy, Proposal, ProposalReply};
use crate::error::Result;

/// Translation between termination reasons and a protocol's wire codes
pub trait TerminationCodec: Send + Sync {
    /// Code for a reason; total over the reason set
    fn termination_code(&self, reason: TerminationReason) -> u32;

    /// Description of a code for logs and display
    fn get_termination_reason(&self, code: u32) -> String;

    /// Code for a reason given in string form. Never fails: anything that
    /// does not name a known reason maps to the unknown sentinel.
    fn get_termination_code(&self, reason: &str) -> u32 {
        reason
            .parse::<TerminationReason>()
            .map(|r| self.termination_code(r))
            .unwrap_or(codes::UNKNOWN_REASON)
    }
}

#[async_trait]
pub trait ConsumerProtocolHandler: TerminationCodec {
    fn name(&self) -> &str;

    /// Admission predicate over inbound commands; no side effects
    fn accept_command(&self, cmd: &AgbotCommand) -> bool;

    /// Durably store a new agreement. Caller holds the agreement's lock.
    async fn persist_agreement(
        &self,
        wi: &InitiateAgreement,
        proposal: &Proposal,
        worker_id: &str,
    ) -> Result<()>;

    /// Record a device reply against an existing agreement
    async fn persist_reply(&self, reply: &ProposalReply, policy: &Policy, worker_id: &str)
        -> Result<()>;

    /// Register the accepted agreement with the protocol's own bookkeeping
    async fn post_reply(
        &self,
        agreement_id: &str,
        proposal: &Proposal,
        reply: &ProposalReply,
        consumer_policy: &Policy,
        organization: &str,
        worker_id: &str,
    ) -> Result<()>;

    /// End an agreement locally and tell the device when it can be reached.
    /// Always completes the local part; failures are logged.
    async fn terminate_agreement(&self, agreement: &Agreement, reason_code: u32, worker_id: &str);

    fn create_metering_notification(
        &self,
        meter: &Meter,
        agreement: &Agreement,
    ) -> Result<MeteringNotification>;

    /// Gate consulted before a cancellation proceeds
    fn can_cancel_now(&self, agreement: &Agreement) -> bool;

    fn is_blockchain_writable(&self, chain_type: &str, chain_name: &str, org: &str) -> bool;

    fn set_blockchain_writable(&self, event: &AccountFundedEvent);

    fn handle_blockchain_event(&self, event: &BlockchainEvent);

    /// Re-drive commands that could not be processed when they arrived.
    /// Called on a fixed schedule by the runtime.
    async fn handle_deferred_commands(&self);
}
