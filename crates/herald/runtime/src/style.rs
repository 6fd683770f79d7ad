//! Style version activation.
//!
//! Proposals are generated inactive by the self-style worker. Turning one
//! on is always an explicit operator action, validated here against a fixed
//! output policy. Generation never validates; activation always does.

use crate::clock::Clock;
use crate::error::StyleError;
use herald_storage::{HeraldStorage, QueryWindow, StyleStore};
use herald_types::{StyleVersion, StyleVersionId, StyleVersionPayload};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Hard limits every active style must respect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StylePolicy {
    /// Longest post a style may allow
    #[serde(default = "default_max_post_chars")]
    pub max_post_chars: u32,

    /// Terms that may not appear in rules or vocabulary (case-insensitive)
    #[serde(default)]
    pub forbidden_terms: Vec<String>,

    #[serde(default = "default_true")]
    pub require_rules: bool,
}

impl Default for StylePolicy {
    fn default() -> Self {
        Self {
            max_post_chars: default_max_post_chars(),
            forbidden_terms: Vec::new(),
            require_rules: true,
        }
    }
}

fn default_max_post_chars() -> u32 {
    280
}

fn default_true() -> bool {
    true
}

impl StylePolicy {
    /// Every reason `payload` is unacceptable. Empty means valid.
    pub fn violations(&self, payload: &StyleVersionPayload) -> Vec<String> {
        let mut reasons = Vec::new();

        if self.require_rules && payload.rules.iter().all(|rule| rule.trim().is_empty()) {
            reasons.push("style defines no rules".to_string());
        }

        if let Some(max) = payload.max_post_chars {
            if max > self.max_post_chars {
                reasons.push(format!(
                    "max_post_chars {} exceeds ceiling {}",
                    max, self.max_post_chars
                ));
            }
        }

        for term in &self.forbidden_terms {
            let needle = term.to_lowercase();
            if needle.is_empty() {
                continue;
            }
            let hit = payload
                .rules
                .iter()
                .chain(payload.vocabulary.iter())
                .any(|text| text.to_lowercase().contains(&needle));
            if hit {
                reasons.push(format!("forbidden term '{}'", term));
            }
        }

        reasons
    }
}

pub struct StyleManager {
    storage: Arc<dyn HeraldStorage>,
    clock: Arc<dyn Clock>,
    policy: StylePolicy,
}

impl StyleManager {
    pub fn new(storage: Arc<dyn HeraldStorage>, clock: Arc<dyn Clock>, policy: StylePolicy) -> Self {
        Self {
            storage,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &StylePolicy {
        &self.policy
    }

    pub async fn list(&self, window: QueryWindow) -> Result<Vec<StyleVersion>, StyleError> {
        Ok(self.storage.list_style_versions(window).await?)
    }

    pub async fn active(&self) -> Result<Option<StyleVersion>, StyleError> {
        Ok(self.storage.active_style_version().await?)
    }

    pub async fn activate(&self, id: &StyleVersionId) -> Result<StyleVersion, StyleError> {
        let version = self
            .storage
            .get_style_version(id)
            .await?
            .ok_or_else(|| StyleError::NotFound(id.clone()))?;

        let reasons = self.policy.violations(&version.payload);
        if !reasons.is_empty() {
            warn!(version_id = %id, reasons = ?reasons, "Style activation rejected by policy");
            return Err(StyleError::PolicyViolation {
                id: id.clone(),
                reasons,
            });
        }

        let active = self.storage.set_active_style(id, self.clock.now()).await?;
        info!(version_id = %id, "Style version activated");
        Ok(active)
    }

    /// Re-activate the most recently activated version other than the
    /// current one.
    pub async fn rollback(&self) -> Result<StyleVersion, StyleError> {
        let versions = self.storage.list_style_versions(QueryWindow::default()).await?;
        let current = versions.iter().find(|v| v.is_active).map(|v| v.id.clone());

        let previous = versions
            .into_iter()
            .filter(|v| Some(&v.id) != current.as_ref() && v.activated_at.is_some())
            .max_by_key(|v| v.activated_at)
            .ok_or(StyleError::NoPreviousVersion)?;

        info!(
            from = ?current.as_ref().map(StyleVersionId::as_str),
            to = %previous.id,
            "Rolling back style version"
        );
        self.activate(&previous.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use herald_storage::InMemoryHeraldStorage;
    use std::time::Duration;

    fn payload(rules: &[&str]) -> StyleVersionPayload {
        StyleVersionPayload {
            rules: rules.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    fn manager(policy: StylePolicy) -> (StyleManager, Arc<InMemoryHeraldStorage>, ManualClock) {
        let storage = Arc::new(InMemoryHeraldStorage::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap());
        let manager = StyleManager::new(storage.clone(), Arc::new(clock.clone()), policy);
        (manager, storage, clock)
    }

    async fn propose(
        storage: &InMemoryHeraldStorage,
        clock: &ManualClock,
        payload: StyleVersionPayload,
    ) -> StyleVersionId {
        clock.advance(Duration::from_secs(60));
        let version = StyleVersion::proposal(payload, 30, clock.now());
        let id = version.id.clone();
        storage.insert_style_version(version).await.unwrap();
        id
    }

    #[test]
    fn test_policy_reports_every_violation() {
        let policy = StylePolicy {
            forbidden_terms: vec!["Crypto".to_string()],
            ..Default::default()
        };
        let mut bad = payload(&[]);
        bad.vocabulary = vec!["crypto moon".to_string()];
        bad.max_post_chars = Some(500);

        let reasons = policy.violations(&bad);
        assert_eq!(reasons.len(), 3);
        assert!(policy.violations(&payload(&["be kind"])).is_empty());
    }

    #[tokio::test]
    async fn activation_rejects_policy_violations() {
        let (manager, storage, clock) = manager(StylePolicy::default());
        let id = propose(&storage, &clock, payload(&[])).await;

        let err = manager.activate(&id).await.unwrap_err();
        assert!(matches!(err, StyleError::PolicyViolation { .. }));
        assert!(manager.active().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rollback_returns_to_previous_active() {
        let (manager, storage, clock) = manager(StylePolicy::default());
        let first = propose(&storage, &clock, payload(&["short"])).await;
        let second = propose(&storage, &clock, payload(&["playful"])).await;

        assert!(matches!(
            manager.rollback().await,
            Err(StyleError::NoPreviousVersion)
        ));

        manager.activate(&first).await.unwrap();
        clock.advance(Duration::from_secs(60));
        manager.activate(&second).await.unwrap();

        let restored = manager.rollback().await.unwrap();
        assert_eq!(restored.id, first);

        let versions = manager.list(QueryWindow::default()).await.unwrap();
        assert_eq!(versions.iter().filter(|v| v.is_active).count(), 1);
    }
}
