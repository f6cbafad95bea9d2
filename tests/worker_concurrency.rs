use agbot::adapters::{
    AgreementStore, Endpoint, MemoryAgreementStore, MemoryProtocolRecorder, RecordingMessenger,
    StaticEndpointResolver,
};
use agbot::config::AgreementBotConfig;
use agbot::coordinator::{AgbotCommand, Collaborators, PolicyManager, ProtocolMessage};
use agbot::domain::{Agreement, Policy, Proposal, ProposalReply};
use agbot::error::Result;
use agbot::protocol::{BasicProtocolHandler, TerminationReason, BASIC_PROTOCOL_NAME};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};

/// Store that flags two mutations of one agreement running at once
#[derive(Default)]
struct OverlapDetectingStore {
    inner: MemoryAgreementStore,
    in_flight: Mutex<HashMap<String, usize>>,
    max_overlap: AtomicUsize,
    terminations: Mutex<HashMap<String, usize>>,
}

impl OverlapDetectingStore {
    fn enter(&self, agreement_id: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let n = in_flight.entry(agreement_id.to_string()).or_default();
        *n += 1;
        self.max_overlap.fetch_max(*n, Ordering::SeqCst);
    }

    fn exit(&self, agreement_id: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(n) = in_flight.get_mut(agreement_id) {
            *n -= 1;
        }
    }

    fn terminations(&self, agreement_id: &str) -> usize {
        self.terminations
            .lock()
            .unwrap()
            .get(agreement_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl AgreementStore for OverlapDetectingStore {
    async fn create_agreement(&self, record: Agreement) -> Result<()> {
        self.inner.create_agreement(record).await
    }

    async fn record_reply(&self, agreement_id: &str, reply: &ProposalReply) -> Result<()> {
        self.enter(agreement_id);
        sleep(Duration::from_millis(2)).await;
        let result = self.inner.record_reply(agreement_id, reply).await;
        self.exit(agreement_id);
        result
    }

    async fn mark_terminated(&self, agreement_id: &str, reason_code: u32, reason: &str) -> Result<()> {
        self.enter(agreement_id);
        sleep(Duration::from_millis(2)).await;
        let result = self
            .inner
            .mark_terminated(agreement_id, reason_code, reason)
            .await;
        if result.is_ok() {
            *self
                .terminations
                .lock()
                .unwrap()
                .entry(agreement_id.to_string())
                .or_default() += 1;
        }
        self.exit(agreement_id);
        result
    }

    async fn find_agreement(&self, agreement_id: &str) -> Result<Option<Agreement>> {
        self.inner.find_agreement(agreement_id).await
    }

    async fn delete_agreement(&self, agreement_id: &str) -> Result<()> {
        self.inner.delete_agreement(agreement_id).await
    }

    async fn live_agreements_for_policy(&self, policy_name: &str) -> Result<Vec<Agreement>> {
        self.inner.live_agreements_for_policy(policy_name).await
    }

    async fn proposals_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Agreement>> {
        self.inner.proposals_created_before(cutoff).await
    }
}

const AGREEMENTS: usize = 24;
const WORKERS: usize = 8;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_work_on_one_agreement_never_interleaves() {
    let store = Arc::new(OverlapDetectingStore::default());
    let resolver = Arc::new(StaticEndpointResolver::new());
    let messenger = Arc::new(RecordingMessenger::new());
    let policy = Policy::new("netspeed", "myorg");

    let mut ids = Vec::new();
    for i in 0..AGREEMENTS {
        let id = format!("agreement-{i:02}");
        let device = format!("device-{i:02}");
        resolver.register(
            &device,
            Endpoint {
                address: format!("mqtt://{device}"),
                public_key: vec![1; 16],
            },
        );
        let proposal = Proposal::new(&id, &device, "myorg", policy.clone(), "token").unwrap();
        store
            .create_agreement(Agreement::from_proposal(&proposal, BASIC_PROTOCOL_NAME))
            .await
            .unwrap();
        ids.push((id, device));
    }

    let cfg = AgreementBotConfig {
        exchange_token: "token".to_string(),
        agreement_workers: WORKERS,
        ..Default::default()
    };
    let handler = Arc::new(
        BasicProtocolHandler::new(
            BASIC_PROTOCOL_NAME,
            &cfg,
            Collaborators {
                store: store.clone(),
                policies: Arc::new(PolicyManager::with_policies([policy])),
                resolver,
                messenger,
                recorder: Arc::new(MemoryProtocolRecorder::new()),
            },
        )
        .unwrap(),
    );
    handler.initialize().await.unwrap();

    // Every agreement gets a reply and three racing cancellations.
    for (id, device) in &ids {
        let commands = [
            AgbotCommand::NewProtocolMessage {
                protocol: BASIC_PROTOCOL_NAME.to_string(),
                message: ProtocolMessage::Reply(ProposalReply::accept(id, device, "sig")),
            },
            AgbotCommand::AgreementTimeout {
                agreement_id: id.clone(),
                protocol: BASIC_PROTOCOL_NAME.to_string(),
                reason: TerminationReason::NoDataReceived,
            },
            AgbotCommand::NewProtocolMessage {
                protocol: BASIC_PROTOCOL_NAME.to_string(),
                message: ProtocolMessage::Cancel {
                    agreement_id: id.clone(),
                    device_id: device.clone(),
                    reason_code: 105,
                },
            },
            AgbotCommand::AgreementTimeout {
                agreement_id: id.clone(),
                protocol: BASIC_PROTOCOL_NAME.to_string(),
                reason: TerminationReason::CancelDiscovered,
            },
        ];
        for cmd in commands {
            assert_eq!(handler.dispatch(cmd).await.unwrap(), 1);
        }
    }

    let mut settled = false;
    for _ in 0..500 {
        let mut all = true;
        for (id, _) in &ids {
            let ag = store.find_agreement(id).await.unwrap().unwrap();
            all &= ag.is_terminated();
        }
        if all {
            settled = true;
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(settled, "not every agreement was terminated");

    handler.shutdown().await;

    assert_eq!(store.max_overlap.load(Ordering::SeqCst), 1);
    for (id, _) in &ids {
        assert_eq!(store.terminations(id), 1, "{id} terminated more than once");
    }
}
