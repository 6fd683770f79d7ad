//! Pre-publish safety gate.
//!
//! Settings are fetched fresh on every call. [`SafetyGate::check`] only
//! reads the rate counters; [`SafetyGate::admit`] also reserves the rate
//! slot the publish will use, and the caller cancels it if the post never
//! goes out.

use crate::rate_limit::{RateLimiter, Reservation, POST};
use crate::settings::SettingsStore;
use herald_types::SkipReason;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Where the content about to be published came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOrigin {
    /// A draft an operator approved
    ApprovedDraft,
    /// A draft still pending review
    PendingDraft,
    /// Content generated moments ago, never queued
    Fresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    SafeMode,
    RateLimited,
    ApprovalRequired,
    SettingsUnavailable,
}

impl BlockReason {
    /// Skip reason recorded by a worker that hit this block, if any.
    pub fn as_skip(&self) -> Option<SkipReason> {
        match self {
            BlockReason::SafeMode => Some(SkipReason::SafeMode),
            BlockReason::RateLimited => Some(SkipReason::RateLimited),
            BlockReason::ApprovalRequired | BlockReason::SettingsUnavailable => None,
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BlockReason::SafeMode => "safe mode",
            BlockReason::RateLimited => "rate limited",
            BlockReason::ApprovalRequired => "approval required",
            BlockReason::SettingsUnavailable => "settings unavailable",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum GateDecision {
    Allowed,
    Blocked(BlockReason),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed)
    }
}

/// Result of [`SafetyGate::admit`].
#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    Granted(Reservation),
    Blocked(BlockReason),
}

#[derive(Clone)]
pub struct SafetyGate {
    settings: SettingsStore,
    limiter: RateLimiter,
}

impl SafetyGate {
    pub fn new(settings: SettingsStore, limiter: RateLimiter) -> Self {
        Self { settings, limiter }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// All checks must pass: safe mode off, approval satisfied, rate allows.
    pub async fn check(&self, origin: ActionOrigin) -> GateDecision {
        if let Err(reason) = self.screen(origin).await {
            return GateDecision::Blocked(reason);
        }

        if !self.limiter.allow(POST).await {
            return GateDecision::Blocked(BlockReason::RateLimited);
        }

        GateDecision::Allowed
    }

    /// Same checks as [`check`](Self::check), but a pass holds a rate slot.
    pub async fn admit(&self, origin: ActionOrigin) -> Admission {
        if let Err(reason) = self.screen(origin).await {
            return Admission::Blocked(reason);
        }

        match self.limiter.reserve(POST).await {
            Ok(Some(reservation)) => Admission::Granted(reservation),
            Ok(None) => Admission::Blocked(BlockReason::RateLimited),
            Err(e) => {
                warn!(error = %e, "Rate counters unavailable, blocking publish");
                Admission::Blocked(BlockReason::RateLimited)
            }
        }
    }

    async fn screen(&self, origin: ActionOrigin) -> Result<(), BlockReason> {
        let settings = match self.settings.current().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Settings unavailable, blocking publish");
                return Err(BlockReason::SettingsUnavailable);
            }
        };

        if settings.safe_mode {
            return Err(BlockReason::SafeMode);
        }

        if settings.approval_required && origin != ActionOrigin::ApprovedDraft {
            return Err(BlockReason::ApprovalRequired);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::rate_limit::RateLimits;
    use herald_storage::InMemoryHeraldStorage;
    use herald_types::{RuntimeSettings, SettingsPatch};
    use std::sync::Arc;

    fn gate(hourly: u64) -> (SafetyGate, SettingsStore) {
        let storage = Arc::new(InMemoryHeraldStorage::new());
        let clock = Arc::new(SystemClock);
        let settings = SettingsStore::new(storage.clone(), clock.clone(), RuntimeSettings::default());
        let limiter = RateLimiter::new(storage, clock, RateLimits { hourly, daily: 100 });
        (SafetyGate::new(settings.clone(), limiter), settings)
    }

    #[tokio::test]
    async fn approval_required_blocks_unapproved_content() {
        let (gate, _) = gate(5);
        assert_eq!(gate.check(ActionOrigin::ApprovedDraft).await, GateDecision::Allowed);
        assert_eq!(
            gate.check(ActionOrigin::Fresh).await,
            GateDecision::Blocked(BlockReason::ApprovalRequired)
        );
        assert_eq!(
            gate.check(ActionOrigin::PendingDraft).await,
            GateDecision::Blocked(BlockReason::ApprovalRequired)
        );
    }

    #[tokio::test]
    async fn safe_mode_takes_effect_on_next_check() {
        let (gate, settings) = gate(5);
        assert!(gate.check(ActionOrigin::ApprovedDraft).await.is_allowed());

        let on = SettingsPatch {
            safe_mode: Some(true),
            ..Default::default()
        };
        settings.apply(on, None).await.unwrap();
        assert_eq!(
            gate.check(ActionOrigin::ApprovedDraft).await,
            GateDecision::Blocked(BlockReason::SafeMode)
        );

        let off = SettingsPatch {
            safe_mode: Some(false),
            ..Default::default()
        };
        settings.apply(off, None).await.unwrap();
        assert!(gate.check(ActionOrigin::ApprovedDraft).await.is_allowed());
    }

    #[tokio::test]
    async fn check_records_nothing() {
        let (gate, _) = gate(1);
        for _ in 0..5 {
            assert!(gate.check(ActionOrigin::ApprovedDraft).await.is_allowed());
        }
        gate.limiter().record(POST).await.unwrap();
        assert_eq!(
            gate.check(ActionOrigin::ApprovedDraft).await,
            GateDecision::Blocked(BlockReason::RateLimited)
        );
    }

    #[tokio::test]
    async fn admit_holds_the_slot_until_cancelled() {
        let (gate, _) = gate(1);
        let reservation = match gate.admit(ActionOrigin::ApprovedDraft).await {
            Admission::Granted(reservation) => reservation,
            other => panic!("expected a grant, got {:?}", other),
        };
        assert_eq!(
            gate.admit(ActionOrigin::ApprovedDraft).await,
            Admission::Blocked(BlockReason::RateLimited)
        );

        gate.limiter().cancel(reservation).await.unwrap();
        assert!(matches!(
            gate.admit(ActionOrigin::ApprovedDraft).await,
            Admission::Granted(_)
        ));
    }

    #[tokio::test]
    async fn admit_blocks_before_touching_counters() {
        let (gate, settings) = gate(5);
        let on = SettingsPatch {
            safe_mode: Some(true),
            ..Default::default()
        };
        settings.apply(on, None).await.unwrap();
        assert_eq!(
            gate.admit(ActionOrigin::ApprovedDraft).await,
            Admission::Blocked(BlockReason::SafeMode)
        );
        assert_eq!(gate.limiter().usage(POST).await.unwrap().hourly_used, 0);
    }
}
