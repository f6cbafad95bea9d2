//! Agreement protocols spoken by the bot

pub mod basic;
pub mod handler;
pub mod termination;

pub use basic::{BasicProtocolHandler, BASIC_PROTOCOL_NAME};
pub use handler::{ConsumerProtocolHandler, TerminationCodec};
pub use termination::{basic_termination_code, codes, decode_reason_code, TerminationReason};
