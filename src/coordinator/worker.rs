//! Negotiation worker
//!
//! Each worker pulls one item at a time off the shared work queue, takes the
//! lock for the agreement it touches and runs the step to completion. Steps
//! are never interrupted; shutdown is only observed between items.

use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::base::BaseConsumerProtocolHandler;
use super::lock::{AgreementLockGuard, AgreementLockManager};
use super::work::{AgreementWork, InitiateAgreement};
use crate::domain::{Agreement, Policy, Proposal, ProposalReply};
use crate::protocol::{ConsumerProtocolHandler, TerminationReason};

pub type SharedWorkQueue = Arc<Mutex<mpsc::UnboundedReceiver<AgreementWork>>>;

/// Bytes of randomness in an agreement id (hex encoded to twice as many chars)
const AGREEMENT_ID_BYTES: usize = 32;

/// Shared collaborators handed to every worker
#[derive(Clone)]
pub struct WorkerContext {
    pub handler: Arc<dyn ConsumerProtocolHandler>,
    pub base: Arc<BaseConsumerProtocolHandler>,
    pub locks: AgreementLockManager,
}

pub struct AgreementWorker {
    id: String,
    ctx: WorkerContext,
    // Per-worker generator; never shared across tasks
    rng: StdRng,
}

impl AgreementWorker {
    /// `index` is mixed into the OS entropy so workers started in the same
    /// instant still get distinct streams.
    pub fn new(index: usize, ctx: WorkerContext) -> Self {
        let seed = OsRng.next_u64() ^ (index as u64).rotate_left(32);
        Self {
            id: Uuid::new_v4().to_string(),
            ctx,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Worker main loop
    pub async fn run(mut self, queue: SharedWorkQueue, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.id, protocol = %self.ctx.handler.name(), "Agreement worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let work = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                work = async { queue.lock().await.recv().await } => work,
            };

            match work {
                Some(work) => self.process(work).await,
                None => {
                    debug!(worker_id = %self.id, "Work queue closed");
                    break;
                }
            }
        }

        info!(worker_id = %self.id, "Agreement worker stopped");
    }

    async fn process(&mut self, work: AgreementWork) {
        debug!(
            worker_id = %self.id,
            kind = work.kind(),
            agreement_id = work.agreement_id().unwrap_or(""),
            "Processing work item"
        );

        match work {
            AgreementWork::InitiateAgreement(wi) => self.initiate(wi).await,
            AgreementWork::HandleReply(reply) => self.handle_reply(reply).await,
            AgreementWork::CancelAgreement {
                agreement_id,
                reason_code,
                device_id,
            } => {
                self.cancel(&agreement_id, reason_code, device_id.as_deref())
                    .await
            }
            AgreementWork::PolicyChanged(policy) => self.policy_changed(policy).await,
            AgreementWork::PolicyDeleted { policy_name } => self.policy_deleted(&policy_name).await,
            AgreementWork::WorkloadUpgrade {
                device_id,
                policy_name,
                agreement_id,
            } => {
                self.workload_upgrade(&device_id, &policy_name, agreement_id.as_deref())
                    .await
            }
        }
    }

    fn new_agreement_id(&mut self) -> String {
        let mut bytes = [0u8; AGREEMENT_ID_BYTES];
        self.rng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    async fn initiate(&mut self, wi: InitiateAgreement) {
        let agreement_id = self.new_agreement_id();
        let _lock = self.ctx.locks.acquire(&agreement_id).await;

        let proposal = match Proposal::new(
            &agreement_id,
            &wi.device_id,
            &wi.organization,
            wi.policy.clone(),
            self.ctx.base.signing_key(),
        ) {
            Ok(p) => p,
            Err(e) => {
                error!(worker_id = %self.id, device_id = %wi.device_id, error = %e, "Unable to build proposal");
                return;
            }
        };

        if let Err(e) = self.ctx.handler.persist_agreement(&wi, &proposal, &self.id).await {
            error!(
                worker_id = %self.id,
                agreement_id = %agreement_id,
                error = %e,
                "Unable to persist agreement"
            );
            return;
        }

        if let Err(e) = self.ctx.base.send_proposal(&proposal, &self.id).await {
            warn!(
                worker_id = %self.id,
                agreement_id = %agreement_id,
                device_id = %wi.device_id,
                error = %e,
                "Unable to send proposal, deleting agreement"
            );
            if let Err(e) = self.ctx.base.store().delete_agreement(&agreement_id).await {
                error!(worker_id = %self.id, agreement_id = %agreement_id, error = %e, "Unable to delete agreement");
            }
        }
    }

    async fn handle_reply(&mut self, reply: ProposalReply) {
        let Some((_lock, agreement)) = self.lock_live(&reply.agreement_id).await else {
            return;
        };

        if reply.device_id != agreement.device_id {
            warn!(
                worker_id = %self.id,
                agreement_id = %agreement.agreement_id,
                expected = %agreement.device_id,
                actual = %reply.device_id,
                "Reply from unexpected device, ignoring"
            );
            return;
        }

        if !reply.accepted {
            let code = self
                .ctx
                .handler
                .termination_code(TerminationReason::NegativeReply);
            self.ctx
                .handler
                .terminate_agreement(&agreement, code, &self.id)
                .await;
            return;
        }

        let policy = &agreement.proposal.policy;
        if let Err(e) = self.ctx.handler.persist_reply(&reply, policy, &self.id).await {
            error!(worker_id = %self.id, agreement_id = %agreement.agreement_id, error = %e, "Unable to persist reply");
            return;
        }

        if let Err(e) = self
            .ctx
            .handler
            .post_reply(
                &agreement.agreement_id,
                &agreement.proposal,
                &reply,
                policy,
                &agreement.organization,
                &self.id,
            )
            .await
        {
            error!(
                worker_id = %self.id,
                agreement_id = %agreement.agreement_id,
                error = %e,
                "Error recording agreement, terminating"
            );
            let code = self
                .ctx
                .handler
                .termination_code(TerminationReason::BlockchainWriteFailed);
            self.ctx
                .handler
                .terminate_agreement(&agreement, code, &self.id)
                .await;
        }
    }

    /// Terminate a live agreement. When `from_device` is given, only that
    /// device's own agreement is cancelled.
    async fn cancel(&mut self, agreement_id: &str, reason_code: u32, from_device: Option<&str>) {
        let Some((_lock, agreement)) = self.lock_live(agreement_id).await else {
            return;
        };

        if let Some(device_id) = from_device {
            if device_id != agreement.device_id {
                warn!(
                    worker_id = %self.id,
                    agreement_id,
                    expected = %agreement.device_id,
                    actual = %device_id,
                    "Cancel from unexpected device, ignoring"
                );
                return;
            }
        }

        if !self.ctx.handler.can_cancel_now(&agreement) {
            info!(worker_id = %self.id, agreement_id, "Cancellation deferred by protocol");
            return;
        }

        self.ctx
            .handler
            .terminate_agreement(&agreement, reason_code, &self.id)
            .await;
    }

    async fn policy_changed(&mut self, policy: Policy) {
        let new_hash = policy.hash();
        let code = self
            .ctx
            .handler
            .termination_code(TerminationReason::PolicyChanged);

        for ag in self.live_for_policy(&policy.name).await {
            if ag.policy_hash != new_hash {
                self.cancel(&ag.agreement_id, code, None).await;
            }
        }
    }

    async fn policy_deleted(&mut self, policy_name: &str) {
        let code = self
            .ctx
            .handler
            .termination_code(TerminationReason::PolicyChanged);

        for ag in self.live_for_policy(policy_name).await {
            self.cancel(&ag.agreement_id, code, None).await;
        }
    }

    async fn workload_upgrade(&mut self, device_id: &str, policy_name: &str, agreement_id: Option<&str>) {
        let code = self
            .ctx
            .handler
            .termination_code(TerminationReason::ForcedUpgrade);

        let targets: Vec<String> = match agreement_id {
            Some(id) => match self.load_live(id).await {
                Some(ag) if ag.device_id == device_id && ag.policy_name == policy_name => {
                    vec![ag.agreement_id]
                }
                Some(ag) => {
                    warn!(
                        worker_id = %self.id,
                        agreement_id = id,
                        device_id,
                        policy = policy_name,
                        agreement_device = %ag.device_id,
                        agreement_policy = %ag.policy_name,
                        "Upgrade does not match agreement, ignoring"
                    );
                    Vec::new()
                }
                None => Vec::new(),
            },
            None => self
                .live_for_policy(policy_name)
                .await
                .into_iter()
                .filter(|ag| ag.device_id == device_id)
                .map(|ag| ag.agreement_id)
                .collect(),
        };

        for id in targets {
            self.cancel(&id, code, Some(device_id)).await;
        }
    }

    async fn live_for_policy(&self, policy_name: &str) -> Vec<Agreement> {
        match self
            .ctx
            .base
            .store()
            .live_agreements_for_policy(policy_name)
            .await
        {
            Ok(ags) => ags,
            Err(e) => {
                error!(worker_id = %self.id, policy = policy_name, error = %e, "Unable to list agreements");
                Vec::new()
            }
        }
    }

    /// Lock an agreement that exists and is not terminated. The state is
    /// checked before locking and again once the lock is held.
    async fn lock_live(&self, agreement_id: &str) -> Option<(AgreementLockGuard, Agreement)> {
        self.load_live(agreement_id).await?;
        let lock = self.ctx.locks.acquire(agreement_id).await;
        let agreement = self.load_live(agreement_id).await?;
        Some((lock, agreement))
    }

    async fn load_live(&self, agreement_id: &str) -> Option<Agreement> {
        match self.ctx.base.store().find_agreement(agreement_id).await {
            Ok(Some(ag)) if ag.is_live() => Some(ag),
            Ok(Some(_)) => {
                debug!(worker_id = %self.id, agreement_id, "Agreement already terminated, skipping");
                None
            }
            Ok(None) => {
                warn!(worker_id = %self.id, agreement_id, "Unknown agreement, skipping");
                None
            }
            Err(e) => {
                error!(worker_id = %self.id, agreement_id, error = %e, "Unable to read agreement");
                None
            }
        }
    }
}
