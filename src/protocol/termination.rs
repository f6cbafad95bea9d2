//! Termination reasons and the Basic protocol's cancel codes
//!
//! The numeric codes travel to devices in cancel messages. Their values are
//! part of the wire protocol and must never be renumbered.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Why the agreement bot is ending an agreement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminationReason {
    PolicyChanged,
    NotFinalizedTimeout,
    NoDataReceived,
    NoReply,
    UserRequested,
    DeviceRequested,
    NegativeReply,
    CancelDiscovered,
    ForcedUpgrade,
    BlockchainWriteFailed,
}

impl TerminationReason {
    pub const ALL: [TerminationReason; 10] = [
        TerminationReason::PolicyChanged,
        TerminationReason::NotFinalizedTimeout,
        TerminationReason::NoDataReceived,
        TerminationReason::NoReply,
        TerminationReason::UserRequested,
        TerminationReason::DeviceRequested,
        TerminationReason::NegativeReply,
        TerminationReason::CancelDiscovered,
        TerminationReason::ForcedUpgrade,
        TerminationReason::BlockchainWriteFailed,
    ];

    /// Legacy string form used in logs and by older callers
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::PolicyChanged => "PolicyChanged",
            TerminationReason::NotFinalizedTimeout => "NotFinalized",
            TerminationReason::NoDataReceived => "NoData",
            TerminationReason::NoReply => "NoReply",
            TerminationReason::UserRequested => "UserRequested",
            TerminationReason::DeviceRequested => "DeviceRequested",
            TerminationReason::NegativeReply => "NegativeReply",
            TerminationReason::CancelDiscovered => "CancelDiscovered",
            TerminationReason::ForcedUpgrade => "ForceUpgrade",
            TerminationReason::BlockchainWriteFailed => "BCWriteFailed",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TerminationReason {
    type Err = String;

    /// Accepts the legacy identifiers and their spaced, case-insensitive
    /// spellings ("policy changed").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();

        match key.as_str() {
            "policychanged" => Ok(TerminationReason::PolicyChanged),
            "notfinalized" | "notfinalizedtimeout" => Ok(TerminationReason::NotFinalizedTimeout),
            "nodata" | "nodatareceived" => Ok(TerminationReason::NoDataReceived),
            "noreply" => Ok(TerminationReason::NoReply),
            "userrequested" => Ok(TerminationReason::UserRequested),
            "devicerequested" => Ok(TerminationReason::DeviceRequested),
            "negativereply" => Ok(TerminationReason::NegativeReply),
            "canceldiscovered" => Ok(TerminationReason::CancelDiscovered),
            "forceupgrade" | "forcedupgrade" => Ok(TerminationReason::ForcedUpgrade),
            "bcwritefailed" | "blockchainwritefailed" => {
                Ok(TerminationReason::BlockchainWriteFailed)
            }
            _ => Err(format!("unknown termination reason: {s}")),
        }
    }
}

/// Basic protocol cancel codes
pub mod codes {
    // Node-side codes
    pub const CANCEL_NOT_FINALIZED_TIMEOUT: u32 = 100;
    pub const CANCEL_POLICY_CHANGED: u32 = 101;
    pub const CANCEL_TORRENT_FAILURE: u32 = 102;
    pub const CANCEL_CONTAINER_FAILURE: u32 = 103;
    pub const CANCEL_NOT_EXECUTED_TIMEOUT: u32 = 104;
    pub const CANCEL_USER_REQUESTED: u32 = 105;
    pub const CANCEL_AGBOT_REQUESTED: u32 = 106;
    pub const CANCEL_NO_REPLY_ACK: u32 = 107;
    pub const CANCEL_MICROSERVICE_FAILURE: u32 = 108;
    pub const CANCEL_WL_IMAGE_LOAD_FAILURE: u32 = 109;
    pub const CANCEL_MS_IMAGE_LOAD_FAILURE: u32 = 110;
    pub const CANCEL_MS_UPGRADE_REQUIRED: u32 = 111;
    pub const CANCEL_IMAGE_DATA_ERROR: u32 = 112;
    pub const CANCEL_IMAGE_FETCH_FAILURE: u32 = 113;
    pub const CANCEL_IMAGE_FETCH_AUTH_FAILURE: u32 = 114;
    pub const CANCEL_IMAGE_SIG_VERIF_FAILURE: u32 = 115;
    pub const CANCEL_NODE_SHUTDOWN: u32 = 116;

    // Agreement bot codes
    pub const AB_CANCEL_NOT_FINALIZED_TIMEOUT: u32 = 200;
    pub const AB_CANCEL_NO_REPLY: u32 = 201;
    pub const AB_CANCEL_NEGATIVE_REPLY: u32 = 202;
    pub const AB_CANCEL_NO_DATA_RECEIVED: u32 = 203;
    pub const AB_CANCEL_POLICY_CHANGED: u32 = 204;
    pub const AB_CANCEL_DISCOVERED: u32 = 205;
    pub const AB_USER_REQUESTED: u32 = 206;
    pub const AB_CANCEL_FORCED_UPGRADE: u32 = 207;
    pub const AB_CANCEL_BC_WRITE_FAILED: u32 = 208;

    /// Sentinel for reasons this protocol has no code for
    pub const UNKNOWN_REASON: u32 = 999;
}

/// Code for a reason in the Basic protocol.
///
/// Exhaustive on purpose: adding a reason fails to compile until it is mapped.
/// The two blockchain-only reasons have no Basic code and use the sentinel.
pub fn basic_termination_code(reason: TerminationReason) -> u32 {
    match reason {
        TerminationReason::PolicyChanged => codes::AB_CANCEL_POLICY_CHANGED,
        TerminationReason::NoDataReceived => codes::AB_CANCEL_NO_DATA_RECEIVED,
        TerminationReason::NoReply => codes::AB_CANCEL_NO_REPLY,
        TerminationReason::UserRequested => codes::AB_USER_REQUESTED,
        TerminationReason::DeviceRequested => codes::CANCEL_USER_REQUESTED,
        TerminationReason::NegativeReply => codes::AB_CANCEL_NEGATIVE_REPLY,
        TerminationReason::CancelDiscovered => codes::AB_CANCEL_DISCOVERED,
        TerminationReason::ForcedUpgrade => codes::AB_CANCEL_FORCED_UPGRADE,
        TerminationReason::NotFinalizedTimeout | TerminationReason::BlockchainWriteFailed => {
            codes::UNKNOWN_REASON
        }
    }
}

/// Human readable text for a Basic protocol cancel code
pub fn decode_reason_code(code: u32) -> &'static str {
    use codes::*;

    match code {
        CANCEL_NOT_FINALIZED_TIMEOUT => "agreement never appeared on the blockchain",
        CANCEL_POLICY_CHANGED => "node policy changed",
        CANCEL_TORRENT_FAILURE => "torrent failed to download",
        CANCEL_CONTAINER_FAILURE => "workload terminated",
        CANCEL_NOT_EXECUTED_TIMEOUT => "workload start timeout",
        CANCEL_USER_REQUESTED => "node user requested",
        CANCEL_AGBOT_REQUESTED => "agreement bot requested",
        CANCEL_NO_REPLY_ACK => "agreement protocol incomplete, no reply ack received",
        CANCEL_MICROSERVICE_FAILURE => "microservice failed",
        CANCEL_WL_IMAGE_LOAD_FAILURE => "workload image loading failed",
        CANCEL_MS_IMAGE_LOAD_FAILURE => "microservice image loading failed",
        CANCEL_MS_UPGRADE_REQUIRED => "required by microservice upgrade process",
        CANCEL_IMAGE_DATA_ERROR => "image data error",
        CANCEL_IMAGE_FETCH_FAILURE => "image fetching failed",
        CANCEL_IMAGE_FETCH_AUTH_FAILURE => "authorization failed for image fetching",
        CANCEL_IMAGE_SIG_VERIF_FAILURE => "image signature verification failed",
        CANCEL_NODE_SHUTDOWN => "node was unconfigured",
        AB_CANCEL_NOT_FINALIZED_TIMEOUT => {
            "agreement bot never detected agreement on the blockchain"
        }
        AB_CANCEL_NO_REPLY => "agreement bot never received reply to proposal",
        AB_CANCEL_NEGATIVE_REPLY => "agreement bot received negative reply",
        AB_CANCEL_NO_DATA_RECEIVED => "agreement bot did not detect data",
        AB_CANCEL_POLICY_CHANGED => "agreement bot policy changed",
        AB_CANCEL_DISCOVERED => "agreement bot discovered cancellation from producer",
        AB_USER_REQUESTED => "agreement bot user requested",
        AB_CANCEL_FORCED_UPGRADE => "agreement bot user requested workload upgrade",
        AB_CANCEL_BC_WRITE_FAILED => "agreement bot agreement write failed",
        _ => "unknown reason code, device might be downlevel",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_wire_stable() {
        assert_eq!(basic_termination_code(TerminationReason::NoReply), 201);
        assert_eq!(basic_termination_code(TerminationReason::NegativeReply), 202);
        assert_eq!(basic_termination_code(TerminationReason::NoDataReceived), 203);
        assert_eq!(basic_termination_code(TerminationReason::PolicyChanged), 204);
        assert_eq!(basic_termination_code(TerminationReason::CancelDiscovered), 205);
        assert_eq!(basic_termination_code(TerminationReason::UserRequested), 206);
        assert_eq!(basic_termination_code(TerminationReason::ForcedUpgrade), 207);
        assert_eq!(basic_termination_code(TerminationReason::DeviceRequested), 105);
    }

    #[test]
    fn test_blockchain_reasons_use_sentinel() {
        assert_eq!(
            basic_termination_code(TerminationReason::NotFinalizedTimeout),
            codes::UNKNOWN_REASON
        );
        assert_eq!(
            basic_termination_code(TerminationReason::BlockchainWriteFailed),
            codes::UNKNOWN_REASON
        );
    }

    #[test]
    fn test_string_forms_parse_back() {
        for reason in TerminationReason::ALL {
            assert_eq!(reason.as_str().parse::<TerminationReason>(), Ok(reason));
        }
        assert_eq!(
            "policy changed".parse::<TerminationReason>(),
            Ok(TerminationReason::PolicyChanged)
        );
        assert_eq!(
            "NO_REPLY".parse::<TerminationReason>(),
            Ok(TerminationReason::NoReply)
        );
        assert!("totally-unknown-reason".parse::<TerminationReason>().is_err());
    }

    #[test]
    fn test_decode_unknown_code() {
        assert_eq!(
            decode_reason_code(codes::UNKNOWN_REASON),
            "unknown reason code, device might be downlevel"
        );
        assert_eq!(decode_reason_code(204), "agreement bot policy changed");
    }
}
