//! Proposal and reply messages exchanged with devices
//!
//! Wire encoding belongs to the transport; these are the decoded forms.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::policy::Policy;
use crate::error::{AgbotError, Result};

type HmacSha256 = Hmac<Sha256>;

/// A signed proposal sent to a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub agreement_id: String,
    pub device_id: String,
    pub organization: String,
    pub policy: Policy,
    /// Hex SHA-256 of the proposal body
    pub hash: String,
    /// Hex HMAC-SHA256 of `hash`, keyed by the bot's exchange token
    pub signature: String,
}

#[derive(Serialize)]
struct ProposalBody<'a> {
    agreement_id: &'a str,
    device_id: &'a str,
    organization: &'a str,
    policy: &'a Policy,
}

impl Proposal {
    /// Build a proposal and compute its integrity material
    pub fn new(
        agreement_id: &str,
        device_id: &str,
        organization: &str,
        policy: Policy,
        signing_key: &str,
    ) -> Result<Self> {
        let body = ProposalBody {
            agreement_id,
            device_id,
            organization,
            policy: &policy,
        };
        let hash = hex::encode(Sha256::digest(serde_json::to_vec(&body)?));
        let signature = sign(signing_key, &hash)?;

        Ok(Self {
            agreement_id: agreement_id.to_string(),
            device_id: device_id.to_string(),
            organization: organization.to_string(),
            policy,
            hash,
            signature,
        })
    }

    /// Check the signature against the signing key
    pub fn verify(&self, signing_key: &str) -> bool {
        sign(signing_key, &self.hash)
            .map(|sig| sig == self.signature)
            .unwrap_or(false)
    }
}

fn sign(key: &str, hash: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| AgbotError::Internal(format!("invalid signing key: {e}")))?;
    mac.update(hash.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// A device's answer to a proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalReply {
    pub agreement_id: String,
    pub device_id: String,
    pub accepted: bool,
    /// Device's signature over the proposal hash
    pub signature: String,
}

impl ProposalReply {
    pub fn accept(agreement_id: &str, device_id: &str, signature: &str) -> Self {
        Self {
            agreement_id: agreement_id.to_string(),
            device_id: device_id.to_string(),
            accepted: true,
            signature: signature.to_string(),
        }
    }

    pub fn reject(agreement_id: &str, device_id: &str) -> Self {
        Self {
            agreement_id: agreement_id.to_string(),
            device_id: device_id.to_string(),
            accepted: false,
            signature: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proposal_signature_verifies() {
        let policy = Policy::new("netspeed", "acme");
        let proposal = Proposal::new("A1", "D1", "acme", policy, "token").unwrap();

        assert_eq!(proposal.hash.len(), 64);
        assert!(proposal.verify("token"));
        assert!(!proposal.verify("other-token"));
    }

    #[test]
    fn test_hash_binds_agreement_id() {
        let policy = Policy::new("netspeed", "acme");
        let a = Proposal::new("A1", "D1", "acme", policy.clone(), "token").unwrap();
        let b = Proposal::new("A2", "D1", "acme", policy, "token").unwrap();
        assert_ne!(a.hash, b.hash);
    }
}
