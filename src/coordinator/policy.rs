//! Consumer policies known to this bot
//!
//! Shared read-mostly by every worker; the dispatcher is the only writer.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::Policy;

#[derive(Debug, Default)]
pub struct PolicyManager {
    policies: RwLock<HashMap<String, Policy>>,
}

impl PolicyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policies(policies: impl IntoIterator<Item = Policy>) -> Self {
        Self {
            policies: RwLock::new(policies.into_iter().map(|p| (p.name.clone(), p)).collect()),
        }
    }

    /// Insert or replace a policy. Returns true if the terms changed.
    pub async fn upsert(&self, policy: Policy) -> bool {
        let mut policies = self.policies.write().await;
        let changed = policies
            .get(&policy.name)
            .map(|existing| existing.hash() != policy.hash())
            .unwrap_or(true);
        if changed {
            info!(policy = %policy.name, org = %policy.org, "Policy updated");
        }
        policies.insert(policy.name.clone(), policy);
        changed
    }

    pub async fn remove(&self, name: &str) -> Option<Policy> {
        self.policies.write().await.remove(name)
    }

    pub async fn get(&self, name: &str) -> Option<Policy> {
        self.policies.read().await.get(name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.policies.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_reports_changes() {
        let pm = PolicyManager::new();
        let p = Policy::new("netspeed", "acme").with_workload("https://wl", "1.0.0");

        assert!(pm.upsert(p.clone()).await);
        assert!(!pm.upsert(p.clone()).await);
        assert!(pm.upsert(p.with_workload("https://wl2", "1.0.0")).await);
        assert_eq!(pm.len().await, 1);

        assert!(pm.remove("netspeed").await.is_some());
        assert!(pm.get("netspeed").await.is_none());
    }
}
