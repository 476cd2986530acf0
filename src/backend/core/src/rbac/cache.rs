//! Process-wide policy cache with lazy, single-flight construction.
//!
//! The cache publishes an immutable [`CacheHandle`] through an `ArcSwapOption`.
//! Readers never take a lock once a fresh handle is published: a check is an
//! atomic load, an epoch comparison and a timestamp comparison.
//!
//! A handle stops answering when either
//! - `invalidate` has bumped the epoch past the handle's epoch, or
//! - its TTL has elapsed.
//!
//! The next read then joins (or starts) exactly one rebuild. Rebuilds run on a
//! spawned task and every concurrent caller awaits the same shared result, so
//! a caller that gives up waiting never cancels the rebuild the others depend
//! on. A failed load publishes nothing and is not remembered; the next call
//! tries again.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::matcher::PolicyMatcher;
use super::models::{PermissionRecord, PolicyRule};
use super::store::PolicyStore;
use crate::config::PolicyConfig;
use crate::error::{Result, WardenError};

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Handle
// ═══════════════════════════════════════════════════════════════════════════════

/// An immutable, point-in-time snapshot of the rule set plus its compiled matcher.
#[derive(Debug)]
pub struct CacheHandle {
    matcher: PolicyMatcher,
    rules: Vec<PolicyRule>,
    epoch: u64,
    loaded_at: DateTime<Utc>,
    expires_at: Option<Instant>,
}

impl CacheHandle {
    fn new(rules: Vec<PolicyRule>, epoch: u64, ttl: Duration) -> Self {
        Self {
            matcher: PolicyMatcher::compile(&rules),
            rules,
            epoch,
            loaded_at: Utc::now(),
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    pub fn allows(&self, subject: &str, action: &str, path: &str) -> bool {
        self.matcher.allows(subject, action, path)
    }

    /// Permissions held by `subject`, in store order.
    pub fn permissions_for(&self, subject: &str) -> Vec<PermissionRecord> {
        self.rules
            .iter()
            .filter(|rule| rule.subject == subject)
            .map(PolicyRule::to_permission)
            .collect()
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache State
// ═══════════════════════════════════════════════════════════════════════════════

/// Observable lifecycle state of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing has been loaded yet.
    Uninitialized,
    /// The first load is in progress.
    Initializing,
    /// A fresh handle is serving checks.
    Ready,
    /// The published handle is stale (invalidated or expired) and the next
    /// read rebuilds it.
    Invalidated,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Cache
// ═══════════════════════════════════════════════════════════════════════════════

type BuildFuture = Shared<BoxFuture<'static, Result<Arc<CacheHandle>>>>;

struct InFlight {
    epoch: u64,
    future: BuildFuture,
}

struct CacheInner {
    store: Arc<dyn PolicyStore>,
    ttl: Duration,
    eager_reload: bool,
    current: ArcSwapOption<CacheHandle>,
    epoch: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
    loads: AtomicU64,
}

/// Clears the in-flight slot when a build finishes, including by panic.
struct InFlightGuard<'a> {
    inner: &'a CacheInner,
    epoch: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.inner.in_flight.lock();
        if slot.as_ref().is_some_and(|in_flight| in_flight.epoch == self.epoch) {
            *slot = None;
        }
    }
}

impl CacheInner {
    fn fresh_handle(&self) -> Option<Arc<CacheHandle>> {
        let epoch = self.epoch.load(Ordering::Acquire);
        let current = self.current.load();
        match &*current {
            Some(handle) if handle.epoch >= epoch && !handle.is_expired_at(Instant::now()) => {
                Some(Arc::clone(handle))
            }
            _ => None,
        }
    }

    fn spawn_build(self: &Arc<Self>, epoch: u64) -> BuildFuture {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move { inner.build(epoch).await });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(WardenError::internal(format!(
                    "policy cache build task failed: {}",
                    e
                ))),
            }
        }
        .boxed()
        .shared()
    }

    async fn build(self: Arc<Self>, epoch: u64) -> Result<Arc<CacheHandle>> {
        let _slot = InFlightGuard {
            inner: &self,
            epoch,
        };
        let started = Instant::now();

        let rules = match self.store.load_all().await {
            Ok(rules) => rules,
            Err(err) => {
                counter!("warden_policy_cache_loads_total", "outcome" => "failure").increment(1);
                warn!(epoch, error = %err, "Policy cache load failed");
                return Err(match err {
                    WardenError::StoreUnavailable { .. } => err,
                    other => WardenError::store("load_all", other),
                });
            }
        };

        let handle = Arc::new(CacheHandle::new(rules, epoch, self.ttl));
        self.publish(Arc::clone(&handle));
        self.loads.fetch_add(1, Ordering::AcqRel);

        counter!("warden_policy_cache_loads_total", "outcome" => "success").increment(1);
        info!(
            epoch,
            rules = handle.rules.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Policy cache loaded"
        );
        Ok(handle)
    }

    /// Swap in `handle` unless a handle from a later epoch is already live.
    fn publish(&self, handle: Arc<CacheHandle>) {
        self.current.rcu(|current| match current {
            Some(existing) if existing.epoch > handle.epoch => Some(Arc::clone(existing)),
            _ => Some(Arc::clone(&handle)),
        });
    }
}

/// Lazily built, invalidatable policy snapshot shared by every enforcer clone.
#[derive(Clone)]
pub struct PolicyCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for PolicyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyCache")
            .field("ttl", &self.inner.ttl)
            .field("eager_reload", &self.inner.eager_reload)
            .field("epoch", &self.inner.epoch.load(Ordering::Relaxed))
            .field("loads", &self.inner.loads.load(Ordering::Relaxed))
            .finish()
    }
}

impl PolicyCache {
    pub fn new(store: Arc<dyn PolicyStore>, config: &PolicyConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store,
                ttl: config.cache_ttl,
                eager_reload: config.eager_reload,
                current: ArcSwapOption::empty(),
                epoch: AtomicU64::new(0),
                in_flight: Mutex::new(None),
                loads: AtomicU64::new(0),
            }),
        }
    }

    /// Return a fresh handle, loading from the store if needed.
    ///
    /// Concurrent callers that find the cache stale share a single load.
    pub async fn ensure_loaded(&self) -> Result<Arc<CacheHandle>> {
        if let Some(handle) = self.inner.fresh_handle() {
            return Ok(handle);
        }

        let build = {
            let mut slot = self.inner.in_flight.lock();

            // A build may have published between the first check and the lock.
            if let Some(handle) = self.inner.fresh_handle() {
                return Ok(handle);
            }

            let epoch = self.inner.epoch.load(Ordering::Acquire);
            match slot.as_ref() {
                Some(in_flight) if in_flight.epoch == epoch => in_flight.future.clone(),
                _ => {
                    debug!(epoch, "Starting policy cache build");
                    let future = self.inner.spawn_build(epoch);
                    *slot = Some(InFlight {
                        epoch,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        build.await
    }

    /// Mark the published snapshot stale.
    ///
    /// Any check that starts after this returns observes rules loaded after
    /// this call began. With `eager_reload` the rebuild happens here and a
    /// failure is reported as `InvalidationFailure`.
    pub async fn invalidate(&self) -> Result<()> {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        counter!("warden_policy_cache_invalidations_total").increment(1);
        debug!(epoch, "Policy cache invalidated");

        if self.inner.eager_reload {
            self.ensure_loaded()
                .await
                .map_err(WardenError::invalidation)?;
        }
        Ok(())
    }

    pub fn state(&self) -> CacheState {
        let building = self.inner.in_flight.lock().is_some();
        let epoch = self.inner.epoch.load(Ordering::Acquire);

        match self.inner.current.load_full() {
            None if building => CacheState::Initializing,
            None => CacheState::Uninitialized,
            Some(handle) if handle.epoch >= epoch && !handle.is_expired_at(Instant::now()) => {
                CacheState::Ready
            }
            Some(_) => CacheState::Invalidated,
        }
    }

    /// Number of successful loads from the store so far.
    pub fn load_count(&self) -> u64 {
        self.inner.loads.load(Ordering::Acquire)
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// The currently published handle, fresh or not.
    pub fn current(&self) -> Option<Arc<CacheHandle>> {
        self.inner.current.load_full()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
