//! Agreement negotiation machinery
//!
//! Commands are admitted by a protocol handler, turned into work items and
//! queued for a fixed pool of workers. Workers serialize per agreement
//! through the lock manager and call back into the handler for every
//! lifecycle step.

pub mod base;
pub mod command;
pub mod lock;
pub mod policy;
pub mod pool;
pub mod work;
pub mod worker;

pub use base::{BaseConsumerProtocolHandler, Collaborators};
pub use command::{AccountFundedEvent, AgbotCommand, BlockchainEvent, ProtocolMessage};
pub use lock::{AgreementLockGuard, AgreementLockManager};
pub use policy::PolicyManager;
pub use pool::WorkerPool;
pub use work::{AgreementWork, InitiateAgreement};
pub use worker::{AgreementWorker, WorkerContext};
