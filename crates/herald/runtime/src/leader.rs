//! TTL-based leader lock.
//!
//! A lease is held by one instance identity at a time. Renew and release
//! carry the identity stored in the [`Lease`], so a stale caller whose lease
//! was taken over can neither extend nor drop the new owner's lease.
//! Failing to acquire is not an error: it means another instance is already
//! doing the work.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use herald_storage::{LeaseRecord, LeaseStore, StorageResult};
use herald_types::HolderId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A lease granted to this instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub holder: HolderId,
    pub fencing_token: u64,
    pub expires_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl Lease {
    fn from_record(record: LeaseRecord, ttl: Duration) -> Self {
        Self {
            key: record.key,
            holder: record.holder,
            fencing_token: record.fencing_token,
            expires_at: record.expires_at,
            ttl,
        }
    }
}

#[derive(Clone)]
pub struct LeaderLock {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    holder: HolderId,
}

impl LeaderLock {
    pub fn new(store: Arc<dyn LeaseStore>, clock: Arc<dyn Clock>, holder: HolderId) -> Self {
        Self {
            store,
            clock,
            holder,
        }
    }

    /// This instance's identity.
    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> StorageResult<Option<Lease>> {
        let now = self.clock.now();
        let acquired = self
            .store
            .try_acquire_lease(key, &self.holder, ttl, now)
            .await?;

        match acquired {
            Some(record) => {
                info!(
                    key,
                    holder = %self.holder,
                    fencing_token = record.fencing_token,
                    expires_at = %record.expires_at,
                    "Lease acquired"
                );
                Ok(Some(Lease::from_record(record, ttl)))
            }
            None => {
                debug!(key, holder = %self.holder, "Lease held by another instance");
                Ok(None)
            }
        }
    }

    /// Extend `lease`. `None` means ownership was lost; nothing was changed.
    pub async fn renew(&self, lease: &Lease) -> StorageResult<Option<Lease>> {
        let now = self.clock.now();
        let renewed = self
            .store
            .renew_lease(&lease.key, &lease.holder, lease.ttl, now)
            .await?;
        Ok(renewed.map(|record| Lease::from_record(record, lease.ttl)))
    }

    /// Release `lease` if still owned. Returns whether anything was released.
    pub async fn release(&self, lease: &Lease) -> StorageResult<bool> {
        let released = self.store.release_lease(&lease.key, &lease.holder).await?;
        if released {
            info!(key = %lease.key, holder = %lease.holder, "Lease released");
        } else {
            debug!(key = %lease.key, holder = %lease.holder, "Release ignored, lease not owned");
        }
        Ok(released)
    }

    /// Current lease record for `key`, whoever holds it.
    pub async fn state(&self, key: &str) -> StorageResult<Option<LeaseRecord>> {
        self.store.get_lease(key).await
    }

    /// Renew `lease` every `ttl / 3` until the guard is released or dropped.
    pub fn keep_alive(&self, lease: Lease) -> LeaseGuard {
        let current = Arc::new(Mutex::new(lease.clone()));
        let lost = Arc::new(AtomicBool::new(false));
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let lock = self.clone();
        let task_lease = current.clone();
        let task_lost = lost.clone();
        let period = lease.ttl / 3;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = lock.clock.sleep(period) => {}
                    _ = stop_rx.changed() => break,
                }

                let snapshot = task_lease.lock().await.clone();
                match lock.renew(&snapshot).await {
                    Ok(Some(renewed)) => {
                        debug!(key = %renewed.key, expires_at = %renewed.expires_at, "Lease renewed");
                        *task_lease.lock().await = renewed;
                    }
                    Ok(None) => {
                        warn!(key = %snapshot.key, holder = %snapshot.holder, "Lease lost, stopping renewal");
                        task_lost.store(true, Ordering::SeqCst);
                        break;
                    }
                    Err(e) => {
                        warn!(key = %snapshot.key, error = %e, "Lease renewal failed, will retry");
                    }
                }
            }
        });

        LeaseGuard {
            lock: self.clone(),
            lease: current,
            lost,
            stop: stop_tx,
            handle: Some(handle),
        }
    }
}

/// Keeps a lease alive in the background.
///
/// Dropping the guard stops renewal and lets the lease lapse at its TTL;
/// [`LeaseGuard::release`] gives it up immediately.
pub struct LeaseGuard {
    lock: LeaderLock,
    lease: Arc<Mutex<Lease>>,
    lost: Arc<AtomicBool>,
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl LeaseGuard {
    /// Whether a renewal found the lease owned by someone else.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    pub async fn lease(&self) -> Lease {
        self.lease.lock().await.clone()
    }

    pub async fn release(mut self) -> StorageResult<bool> {
        let _ = self.stop.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        let lease = self.lease.lock().await.clone();
        self.lock.release(&lease).await
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
