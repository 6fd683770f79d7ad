//! Runtime settings service.
//!
//! Settings are read from storage on every call and never cached, so a
//! flipped kill switch is honoured by the very next gate check.

use crate::clock::Clock;
use herald_storage::{SettingsStorage, StorageResult};
use herald_types::{RuntimeSettings, SettingsPatch};
use std::sync::Arc;
use tracing::{info, warn};

/// Stored overrides layered over process defaults
#[derive(Clone)]
pub struct SettingsStore {
    storage: Arc<dyn SettingsStorage>,
    clock: Arc<dyn Clock>,
    defaults: RuntimeSettings,
}

impl SettingsStore {
    /// Configured flags are merged into the built-in flag set, so a partial
    /// flag table never switches off the flags it does not mention.
    pub fn new(
        storage: Arc<dyn SettingsStorage>,
        clock: Arc<dyn Clock>,
        configured: RuntimeSettings,
    ) -> Self {
        let mut defaults = RuntimeSettings::default();
        defaults.safe_mode = configured.safe_mode;
        defaults.approval_required = configured.approval_required;
        defaults.flags.extend(configured.flags);

        Self {
            storage,
            clock,
            defaults,
        }
    }

    pub fn defaults(&self) -> &RuntimeSettings {
        &self.defaults
    }

    /// Effective settings right now.
    pub async fn current(&self) -> StorageResult<RuntimeSettings> {
        let rows = self.storage.list_settings().await?;
        let (effective, ignored) = RuntimeSettings::overlay(&self.defaults, &rows);
        for key in ignored {
            warn!(key = %key, "Ignoring non-boolean setting row");
        }
        Ok(effective)
    }

    /// Persist a patch and return the resulting effective settings.
    pub async fn apply(
        &self,
        patch: SettingsPatch,
        actor: Option<&str>,
    ) -> StorageResult<RuntimeSettings> {
        for record in patch.into_records(self.clock.now(), actor) {
            info!(
                key = %record.key,
                value = %record.value,
                actor = actor.unwrap_or("unknown"),
                "Setting updated"
            );
            self.storage.upsert_setting(record).await?;
        }
        self.current().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use herald_storage::InMemoryHeraldStorage;
    use herald_types::settings::flags;

    fn store(configured: RuntimeSettings) -> SettingsStore {
        SettingsStore::new(
            Arc::new(InMemoryHeraldStorage::new()),
            Arc::new(SystemClock),
            configured,
        )
    }

    #[tokio::test]
    async fn stored_rows_win_over_defaults() {
        let settings = store(RuntimeSettings::default());
        assert!(!settings.current().await.unwrap().safe_mode);

        let patch = SettingsPatch {
            safe_mode: Some(true),
            ..Default::default()
        };
        let effective = settings.apply(patch, Some("ops")).await.unwrap();
        assert!(effective.safe_mode);
        assert!(settings.current().await.unwrap().safe_mode);
    }

    #[tokio::test]
    async fn partial_configured_flags_keep_builtin_flags() {
        let mut configured = RuntimeSettings::default();
        configured.flags.clear();
        configured.flags.insert(flags::SELF_STYLE.to_string(), true);

        let settings = store(configured);
        let effective = settings.current().await.unwrap();
        assert!(effective.flag(flags::SELF_STYLE));
        assert!(effective.flag(flags::INGESTION));
    }
}
