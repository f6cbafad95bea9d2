//! Agreement domain types

pub mod agreement;
pub mod metering;
pub mod policy;
pub mod proposal;

pub use agreement::{Agreement, AgreementState};
pub use metering::MeteringNotification;
pub use policy::{DataVerification, Meter, Policy, Workload};
pub use proposal::{Proposal, ProposalReply};
