pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod protocol;

pub use adapters::{
    AgreementStore, DeviceMessenger, MemoryAgreementStore, MemoryProtocolRecorder,
    MessageTargetResolver, ProtocolRecorder, RecordingMessenger, StaticEndpointResolver,
};
pub use config::AppConfig;
pub use coordinator::{
    AgbotCommand, AgreementLockManager, AgreementWork, Collaborators, PolicyManager,
    ProtocolMessage, WorkerPool,
};
pub use domain::{Agreement, AgreementState, Policy, Proposal, ProposalReply};
pub use error::{AgbotError, Result};
pub use protocol::{
    BasicProtocolHandler, ConsumerProtocolHandler, TerminationCodec, TerminationReason,
    BASIC_PROTOCOL_NAME,
};
