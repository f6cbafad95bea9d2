//! Metering notification payload

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agreement::Agreement;
use super::policy::Meter;
use crate::error::{AgbotError, Result};

/// Token accrual report sent to a device for one agreement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteringNotification {
    pub agreement_id: String,
    /// Tokens earned since the agreement was created
    pub amount: u64,
    pub start_time: i64,
    pub current_time: i64,
    /// Seconds in which data verification found no data
    pub missed_time: u64,
    pub agreement_hash: String,
    pub consumer_signature: String,
    pub producer_signature: String,
    /// Unused by protocols without on-chain settlement
    pub consumer_meter_signature: String,
    pub consumer_address: String,
}

impl MeteringNotification {
    /// Compute the notification as of `now`. Pure: no clocks, no I/O.
    pub fn new(meter: &Meter, agreement: &Agreement, now: DateTime<Utc>) -> Result<Self> {
        if meter.tokens == 0 {
            return Err(AgbotError::Validation(
                "meter must grant a positive number of tokens".to_string(),
            ));
        }
        let unit_secs = meter.time_unit_secs()?;

        let elapsed = (now - agreement.creation_time).num_seconds().max(0) as u64;
        let missed_time = agreement
            .data_verification_missed_count
            .saturating_mul(u64::from(agreement.data_verification_check_rate));
        let billable = elapsed.saturating_sub(missed_time);
        let amount = meter.tokens.saturating_mul(billable) / unit_secs;

        Ok(Self {
            agreement_id: agreement.agreement_id.clone(),
            amount,
            start_time: agreement.creation_time.timestamp(),
            current_time: now.timestamp(),
            missed_time,
            agreement_hash: agreement.proposal_hash.clone(),
            consumer_signature: agreement.proposal_signature.clone(),
            producer_signature: agreement.counterparty_signature.clone().unwrap_or_default(),
            consumer_meter_signature: String::new(),
            consumer_address: String::new(),
        })
    }
}
