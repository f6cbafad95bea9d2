//! Consumer policy terms offered to devices

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AgbotError, Result};

/// A workload the policy asks the device to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub url: String,
    pub version: String,
}

/// Metering terms: how many tokens accrue per unit of time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    pub tokens: u64,
    /// One of "min", "hour" or "day"
    pub per_time_unit: String,
    #[serde(default)]
    pub notification_interval_secs: u64,
}

impl Meter {
    /// Length of the metering time unit in seconds
    pub fn time_unit_secs(&self) -> Result<u64> {
        match self.per_time_unit.as_str() {
            "min" => Ok(60),
            "hour" => Ok(3_600),
            "day" => Ok(86_400),
            other => Err(AgbotError::Validation(format!(
                "unknown meter time unit: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataVerification {
    pub enabled: bool,
    pub check_rate_secs: u32,
}

/// Consumer policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub org: String,
    #[serde(default)]
    pub workloads: Vec<Workload>,
    #[serde(default)]
    pub meter: Option<Meter>,
    #[serde(default)]
    pub data_verification: Option<DataVerification>,
}

impl Policy {
    pub fn new(name: &str, org: &str) -> Self {
        Self {
            name: name.to_string(),
            org: org.to_string(),
            workloads: Vec::new(),
            meter: None,
            data_verification: None,
        }
    }

    pub fn with_workload(mut self, url: &str, version: &str) -> Self {
        self.workloads.push(Workload {
            url: url.to_string(),
            version: version.to_string(),
        });
        self
    }

    /// Hex SHA-256 over the canonical JSON form; changes whenever any term changes
    pub fn hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}
