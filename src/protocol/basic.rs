//! Basic agreement protocol
//!
//! Off-chain variant: agreements are settled by the proposal/reply exchange
//! alone, so every blockchain hook is a no-op and cancellations are never
//! held back.

use async_trait::async_trait;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, trace, warn};

use super::handler::{ConsumerProtocolHandler, TerminationCodec};
use super::termination::{basic_termination_code, decode_reason_code, TerminationReason};
use crate::adapters::{MessageTarget, ProtocolRecorder};
use crate::config::AgreementBotConfig;
use crate::coordinator::command::{AccountFundedEvent, AgbotCommand, BlockchainEvent, ProtocolMessage};
use crate::coordinator::work::{AgreementWork, InitiateAgreement};
use crate::coordinator::worker::{SharedWorkQueue, WorkerContext};
use crate::coordinator::{AgreementLockManager, BaseConsumerProtocolHandler, Collaborators, WorkerPool};
use crate::domain::{Agreement, Meter, MeteringNotification, Policy, Proposal, ProposalReply};
use crate::error::{AgbotError, Result};

pub const BASIC_PROTOCOL_NAME: &str = "Basic";

pub struct BasicProtocolHandler {
    base: Arc<BaseConsumerProtocolHandler>,
    recorder: Arc<dyn ProtocolRecorder>,
    agreement_workers: usize,
    reply_timeout: chrono::Duration,
    work_tx: mpsc::UnboundedSender<AgreementWork>,
    work_rx: SharedWorkQueue,
    locks: AgreementLockManager,
    pool: Mutex<Option<WorkerPool>>,
}

impl BasicProtocolHandler {
    /// Build the handler for `name`. Only the Basic protocol is known here.
    pub fn new(name: &str, cfg: &AgreementBotConfig, collaborators: Collaborators) -> Result<Self> {
        if name != BASIC_PROTOCOL_NAME {
            return Err(AgbotError::UnsupportedProtocol(name.to_string()));
        }

        let reply_timeout = chrono::Duration::from_std(Duration::from_secs(cfg.process_timeout_secs))
            .map_err(|_| {
                AgbotError::Validation(format!(
                    "process_timeout_secs {} out of range",
                    cfg.process_timeout_secs
                ))
            })?;

        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let base = BaseConsumerProtocolHandler::new(
            name,
            &cfg.exchange_id,
            &cfg.exchange_token,
            &collaborators,
        );

        Ok(Self {
            base: Arc::new(base),
            recorder: collaborators.recorder,
            agreement_workers: cfg.agreement_workers,
            reply_timeout,
            work_tx,
            work_rx: Arc::new(Mutex::new(work_rx)),
            locks: AgreementLockManager::new(),
            pool: Mutex::new(None),
        })
    }

    /// Start the worker pool. Returns once every worker has been spawned.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        let mut pool = self.pool.lock().await;
        if pool.is_some() {
            return Err(AgbotError::Validation(format!(
                "{} protocol handler already initialized",
                self.name()
            )));
        }

        let ctx = WorkerContext {
            handler: self.clone(),
            base: self.base.clone(),
            locks: self.locks.clone(),
        };
        *pool = Some(WorkerPool::start(
            self.agreement_workers,
            ctx,
            self.work_rx.clone(),
        ));

        info!(
            protocol = %self.name(),
            agbot_id = %self.base.agbot_id(),
            workers = self.agreement_workers,
            "Protocol handler initialized"
        );
        Ok(())
    }

    /// Sender onto the queue the workers drain
    pub fn work_queue(&self) -> mpsc::UnboundedSender<AgreementWork> {
        self.work_tx.clone()
    }

    pub fn base(&self) -> &Arc<BaseConsumerProtocolHandler> {
        &self.base
    }

    pub fn locks(&self) -> &AgreementLockManager {
        &self.locks
    }

    /// Configured pool size
    pub fn worker_count(&self) -> usize {
        self.agreement_workers
    }

    /// Workers currently alive; zero before `initialize` and after `shutdown`
    pub async fn running_workers(&self) -> usize {
        self.pool.lock().await.as_ref().map_or(0, WorkerPool::running)
    }

    /// Turn an admitted command into work items and queue them
    pub async fn dispatch(&self, cmd: AgbotCommand) -> Result<usize> {
        if !self.accept_command(&cmd) {
            debug!(protocol = %self.name(), kind = cmd.kind(), "Command not handled by protocol, dropping");
            return Ok(0);
        }

        let items = self.work_for(cmd).await?;
        let count = items.len();
        for item in items {
            self.work_tx
                .send(item)
                .map_err(|_| AgbotError::WorkQueueClosed)?;
        }
        Ok(count)
    }

    async fn work_for(&self, cmd: AgbotCommand) -> Result<Vec<AgreementWork>> {
        let work = match cmd {
            AgbotCommand::NewProtocolMessage { protocol, message } => {
                if protocol != self.name() {
                    debug!(protocol = %self.name(), message_protocol = %protocol, "Message for another protocol");
                    return Ok(Vec::new());
                }
                match message {
                    ProtocolMessage::Reply(reply) => vec![AgreementWork::HandleReply(reply)],
                    ProtocolMessage::Cancel {
                        agreement_id,
                        device_id,
                        reason_code,
                    } => {
                        info!(
                            protocol = %self.name(),
                            agreement_id = %agreement_id,
                            device_id = %device_id,
                            reason_code,
                            reason = %decode_reason_code(reason_code),
                            "Device cancelled agreement"
                        );
                        vec![AgreementWork::CancelAgreement {
                            agreement_id,
                            reason_code,
                            device_id: Some(device_id),
                        }]
                    }
                }
            }
            AgbotCommand::AgreementTimeout {
                agreement_id,
                protocol,
                reason,
            } => {
                if protocol != self.name() {
                    return Ok(Vec::new());
                }
                vec![AgreementWork::CancelAgreement {
                    agreement_id,
                    reason_code: self.termination_code(reason),
                    device_id: None,
                }]
            }
            AgbotCommand::PolicyChanged { policy } => {
                self.base.policies().upsert(policy.clone()).await;
                vec![AgreementWork::PolicyChanged(policy)]
            }
            AgbotCommand::PolicyDeleted { policy_name, .. } => {
                self.base.policies().remove(&policy_name).await;
                vec![AgreementWork::PolicyDeleted { policy_name }]
            }
            AgbotCommand::WorkloadUpgrade {
                device_id,
                policy_name,
                agreement_id,
            } => vec![AgreementWork::WorkloadUpgrade {
                device_id,
                policy_name,
                agreement_id,
            }],
            AgbotCommand::MakeAgreement {
                device_id,
                organization,
                policy_name,
            } => {
                let policy = self.base.policies().get(&policy_name).await.ok_or_else(|| {
                    AgbotError::Validation(format!("unknown policy {policy_name}"))
                })?;
                vec![AgreementWork::InitiateAgreement(InitiateAgreement {
                    device_id,
                    organization,
                    policy,
                })]
            }
            AgbotCommand::BlockchainEvent(_)
            | AgbotCommand::AccountFunded(_)
            | AgbotCommand::Unknown { .. } => Vec::new(),
        };
        Ok(work)
    }

    /// Queue a `NoReply` timeout for every proposal that has waited longer
    /// than the reply timeout. Returns how many were queued.
    pub async fn expire_unanswered_proposals(&self) -> Result<usize> {
        let Some(cutoff) = Utc::now().checked_sub_signed(self.reply_timeout) else {
            return Ok(0);
        };

        let stale = self.base.store().proposals_created_before(cutoff).await?;
        let mut queued = 0;
        for ag in stale {
            warn!(
                protocol = %self.name(),
                agreement_id = %ag.agreement_id,
                device_id = %ag.device_id,
                created = %ag.creation_time,
                "No reply to proposal, timing out"
            );
            queued += self
                .dispatch(AgbotCommand::AgreementTimeout {
                    agreement_id: ag.agreement_id,
                    protocol: self.name().to_string(),
                    reason: TerminationReason::NoReply,
                })
                .await?;
        }
        Ok(queued)
    }

    /// Stop the workers; each finishes its current item first
    pub async fn shutdown(&self) {
        let pool = self.pool.lock().await.take();
        match pool {
            Some(pool) => pool.shutdown().await,
            None => debug!(protocol = %self.name(), "Shutdown requested with no running workers"),
        }
    }
}

impl fmt::Display for BasicProtocolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Name: {}, Workers: {}",
            self.base.name(),
            self.agreement_workers
        )
    }
}

impl fmt::Debug for BasicProtocolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicProtocolHandler")
            .field("base", &self.base)
            .field("agreement_workers", &self.agreement_workers)
            .field("reply_timeout", &self.reply_timeout)
            .finish_non_exhaustive()
    }
}

impl TerminationCodec for BasicProtocolHandler {
    fn termination_code(&self, reason: TerminationReason) -> u32 {
        basic_termination_code(reason)
    }

    fn get_termination_reason(&self, code: u32) -> String {
        decode_reason_code(code).to_string()
    }
}

#[async_trait]
impl ConsumerProtocolHandler for BasicProtocolHandler {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn accept_command(&self, cmd: &AgbotCommand) -> bool {
        matches!(
            cmd,
            AgbotCommand::NewProtocolMessage { .. }
                | AgbotCommand::AgreementTimeout { .. }
                | AgbotCommand::PolicyChanged { .. }
                | AgbotCommand::PolicyDeleted { .. }
                | AgbotCommand::WorkloadUpgrade { .. }
                | AgbotCommand::MakeAgreement { .. }
        )
    }

    async fn persist_agreement(
        &self,
        wi: &InitiateAgreement,
        proposal: &Proposal,
        worker_id: &str,
    ) -> Result<()> {
        self.base.persist_base_agreement(wi, proposal, worker_id).await
    }

    async fn persist_reply(
        &self,
        reply: &ProposalReply,
        policy: &Policy,
        worker_id: &str,
    ) -> Result<()> {
        self.base.persist_reply(reply, policy, worker_id).await
    }

    async fn post_reply(
        &self,
        agreement_id: &str,
        proposal: &Proposal,
        reply: &ProposalReply,
        consumer_policy: &Policy,
        organization: &str,
        worker_id: &str,
    ) -> Result<()> {
        self.recorder
            .record_agreement(proposal, reply, consumer_policy, organization)
            .await?;

        info!(
            protocol = %self.name(),
            worker_id,
            agreement_id,
            organization,
            "Recorded agreement"
        );
        Ok(())
    }

    async fn terminate_agreement(&self, agreement: &Agreement, reason_code: u32, worker_id: &str) {
        let target = match self
            .base
            .get_device_message_endpoint(&agreement.device_id, worker_id)
            .await
        {
            Ok(endpoint) => match MessageTarget::new(&agreement.device_id, endpoint) {
                Ok(target) => Some(target),
                Err(e) => {
                    error!(
                        protocol = %self.name(),
                        worker_id,
                        agreement_id = %agreement.agreement_id,
                        device_id = %agreement.device_id,
                        error = %e,
                        "Error creating message target"
                    );
                    None
                }
            },
            Err(e) => {
                error!(
                    protocol = %self.name(),
                    worker_id,
                    agreement_id = %agreement.agreement_id,
                    device_id = %agreement.device_id,
                    error = %e,
                    "Error obtaining message target for cancel message"
                );
                None
            }
        };

        self.base
            .terminate_agreement(agreement, reason_code, target, worker_id, self)
            .await;
    }

    fn create_metering_notification(
        &self,
        meter: &Meter,
        agreement: &Agreement,
    ) -> Result<MeteringNotification> {
        MeteringNotification::new(meter, agreement, Utc::now())
    }

    fn can_cancel_now(&self, _agreement: &Agreement) -> bool {
        true
    }

    fn is_blockchain_writable(&self, _chain_type: &str, _chain_name: &str, _org: &str) -> bool {
        true
    }

    fn set_blockchain_writable(&self, event: &AccountFundedEvent) {
        trace!(protocol = %self.name(), account = %event.account, "Ignoring account funded event");
    }

    fn handle_blockchain_event(&self, event: &BlockchainEvent) {
        trace!(protocol = %self.name(), chain_type = %event.chain_type, "Ignoring blockchain event");
    }

    async fn handle_deferred_commands(&self) {}
}
