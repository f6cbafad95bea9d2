//! Collaborator contracts consumed by the coordinator, with in-memory
//! implementations.

pub mod exchange;
pub mod recorder;
pub mod store;

pub use exchange::{
    DeviceMessenger, Endpoint, MessageTarget, MessageTargetResolver, RecordingMessenger,
    SentMessage, StaticEndpointResolver,
};
pub use recorder::{MemoryProtocolRecorder, ProtocolRecorder};
pub use store::{AgreementStore, MemoryAgreementStore};
