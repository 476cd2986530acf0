//! Integration tests for the policy enforcer.
//!
//! Tests cover:
//! - Single-flight cache construction under concurrent checks
//! - Administration writes becoming visible to the next check
//! - Replace semantics of grant and duplicate rejection
//! - Revoke filters and cross-role rename
//! - Deny-by-default and load failure handling

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use warden_core::config::PolicyConfig;
use warden_core::error::{Result, WardenError};
use warden_core::rbac::{
    CacheState, MemoryPolicyStore, PermissionRecord, PolicyColumn, PolicyEnforcer, PolicyFilter,
    PolicyRule, PolicyStore, RoleId,
};

// ============================================================================
// Test Store
// ============================================================================

/// Memory store that counts loads, can slow them down and can fail them.
#[derive(Default)]
struct CountingStore {
    inner: MemoryPolicyStore,
    loads: AtomicUsize,
    delay: Duration,
    first_load_delay: Duration,
    down: AtomicBool,
}

impl CountingStore {
    fn seeded(rules: Vec<PolicyRule>) -> Self {
        Self {
            inner: MemoryPolicyStore::with_rules(rules).unwrap(),
            ..Self::default()
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Slow down only the first load. Rules are read before the delay.
    fn with_slow_first_load(mut self, delay: Duration) -> Self {
        self.first_load_delay = delay;
        self
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl PolicyStore for CountingStore {
    async fn load_all(&self) -> Result<Vec<PolicyRule>> {
        let previous = self.loads.fetch_add(1, Ordering::SeqCst);
        let result = if self.down.load(Ordering::SeqCst) {
            Err(WardenError::store("load_all", "connection refused"))
        } else {
            self.inner.load_all().await
        };

        let delay = if previous == 0 && !self.first_load_delay.is_zero() {
            self.first_load_delay
        } else {
            self.delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn insert_many(&self, rules: &[PolicyRule]) -> Result<()> {
        self.inner.insert_many(rules).await
    }

    async fn delete_where(&self, filter: &PolicyFilter) -> Result<bool> {
        self.inner.delete_where(filter).await
    }

    async fn update_where(
        &self,
        predicate: &[(PolicyColumn, String)],
        updates: &[(PolicyColumn, String)],
    ) -> Result<u64> {
        self.inner.update_where(predicate, updates).await
    }

    async fn replace_subject(&self, subject: &str, rules: &[PolicyRule]) -> Result<()> {
        self.inner.replace_subject(subject, rules).await
    }
}

fn perm(path: &str, method: &str) -> PermissionRecord {
    PermissionRecord::new(path, method)
}

fn enforcer_over(store: &Arc<CountingStore>) -> PolicyEnforcer {
    PolicyEnforcer::new(store.clone(), &PolicyConfig::default())
}

fn seeded_store() -> Arc<CountingStore> {
    Arc::new(CountingStore::seeded(vec![
        PolicyRule::new("5", "/api/users/*", "GET"),
        PolicyRule::new("5", "/api/orders", "POST"),
        PolicyRule::new("7", "/api/users/*", "GET"),
    ]))
}

// ============================================================================
// Cache Construction
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_checks_load_once() {
    let store = Arc::new(
        CountingStore::seeded(vec![PolicyRule::new("5", "/api/users/*", "GET")])
            .with_delay(Duration::from_millis(50)),
    );
    let enforcer = Arc::new(enforcer_over(&store));

    let checks = (0..64).map(|i| {
        let enforcer = enforcer.clone();
        tokio::spawn(async move {
            enforcer
                .check(RoleId(5), "GET", &format!("/api/users/{}", i))
                .await
        })
    });

    for result in join_all(checks).await {
        assert!(result.unwrap().unwrap());
    }
    assert_eq!(store.loads(), 1);
    assert_eq!(enforcer.cache().load_count(), 1);
}

#[tokio::test]
async fn test_sequential_checks_reuse_snapshot() {
    let store = seeded_store();
    let enforcer = enforcer_over(&store);

    assert_eq!(enforcer.cache_state(), CacheState::Uninitialized);
    for _ in 0..10 {
        enforcer.check(RoleId(5), "GET", "/api/users/1").await.unwrap();
    }
    assert_eq!(store.loads(), 1);
    assert_eq!(enforcer.cache_state(), CacheState::Ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_check_does_not_cancel_load() {
    let store = Arc::new(
        CountingStore::seeded(vec![PolicyRule::new("5", "/a", "GET")])
            .with_delay(Duration::from_millis(100)),
    );
    let enforcer = Arc::new(enforcer_over(&store));

    let first = {
        let enforcer = enforcer.clone();
        tokio::spawn(async move { enforcer.check(RoleId(5), "GET", "/a").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    first.abort();

    assert!(enforcer.check(RoleId(5), "GET", "/a").await.unwrap());
    assert_eq!(store.loads(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_during_load_is_not_lost() {
    let store = Arc::new(
        CountingStore::seeded(vec![PolicyRule::new("5", "/a", "GET")])
            .with_slow_first_load(Duration::from_millis(300)),
    );
    let enforcer = Arc::new(enforcer_over(&store));

    // Reads the rules before the grant, then stalls.
    let early = {
        let enforcer = enforcer.clone();
        tokio::spawn(async move { enforcer.check(RoleId(5), "GET", "/x").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    enforcer.grant(RoleId(5), &[perm("/x", "GET")]).await.unwrap();
    assert!(enforcer.check(RoleId(5), "GET", "/x").await.unwrap());
    assert_eq!(enforcer.cache().load_count(), 1);

    // The stale load finishes last and must not replace the newer snapshot.
    assert!(!early.await.unwrap().unwrap());
    assert_eq!(enforcer.cache().load_count(), 2);
    assert_eq!(store.loads(), 2);
    assert_eq!(enforcer.cache().current().unwrap().epoch(), 1);
    assert_eq!(enforcer.cache_state(), CacheState::Ready);
    assert!(enforcer.check(RoleId(5), "GET", "/x").await.unwrap());
    assert!(!enforcer.check(RoleId(5), "GET", "/a").await.unwrap());
    assert_eq!(store.loads(), 2);
}

#[tokio::test]
async fn test_load_failure_is_not_cached() {
    let store = seeded_store();
    let enforcer = enforcer_over(&store);

    store.set_down(true);
    let err = enforcer.check(RoleId(5), "GET", "/api/users/1").await.unwrap_err();
    assert!(matches!(err, WardenError::StoreUnavailable { .. }));
    assert_eq!(enforcer.cache_state(), CacheState::Uninitialized);

    store.set_down(false);
    assert!(enforcer.check(RoleId(5), "GET", "/api/users/1").await.unwrap());
    assert_eq!(store.loads(), 2);
}

// ============================================================================
// Administration
// ============================================================================

#[tokio::test]
async fn test_grant_is_visible_to_next_check() {
    let store = seeded_store();
    let enforcer = enforcer_over(&store);

    assert!(enforcer.check(RoleId(5), "POST", "/api/orders").await.unwrap());

    enforcer
        .grant(RoleId(5), &[perm("/api/reports", "GET")])
        .await
        .unwrap();
    assert_eq!(enforcer.cache_state(), CacheState::Invalidated);

    assert!(!enforcer.check(RoleId(5), "POST", "/api/orders").await.unwrap());
    assert!(enforcer.check(RoleId(5), "GET", "/api/reports").await.unwrap());
    assert!(enforcer.check(RoleId(7), "GET", "/api/users/3").await.unwrap());
}

#[tokio::test]
async fn test_grant_replaces_whole_set() {
    let store = seeded_store();
    let enforcer = enforcer_over(&store);

    enforcer
        .grant(RoleId(9), &[perm("/a", "GET"), perm("/b", "GET")])
        .await
        .unwrap();
    enforcer.grant(RoleId(9), &[perm("/c", "PUT")]).await.unwrap();

    assert_eq!(enforcer.list(RoleId(9)).await.unwrap(), vec![perm("/c", "PUT")]);
}

#[tokio::test]
async fn test_duplicate_grant_changes_nothing() {
    let store = seeded_store();
    let enforcer = enforcer_over(&store);
    let before = store.inner.snapshot();

    let err = enforcer
        .grant(
            RoleId(5),
            &[perm("/api/reports", "GET"), perm("/api/reports", "GET")],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, WardenError::DuplicateRule(_)));
    assert_eq!(store.inner.snapshot(), before);
    assert_eq!(
        enforcer.list(RoleId(5)).await.unwrap(),
        vec![perm("/api/users/*", "GET"), perm("/api/orders", "POST")]
    );
}

#[tokio::test]
async fn test_list_unknown_role_is_empty() {
    let store = seeded_store();
    let enforcer = enforcer_over(&store);
    assert!(enforcer.list(RoleId(42)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_revoke_role() {
    let store = seeded_store();
    let enforcer = enforcer_over(&store);
    assert!(enforcer.check(RoleId(5), "GET", "/api/users/1").await.unwrap());

    assert!(enforcer.revoke(PolicyColumn::Subject, &["5"]).await.unwrap());

    assert!(enforcer.list(RoleId(5)).await.unwrap().is_empty());
    assert!(!enforcer.check(RoleId(5), "GET", "/api/users/1").await.unwrap());
    assert!(enforcer.check(RoleId(7), "GET", "/api/users/1").await.unwrap());
}

#[tokio::test]
async fn test_revoke_path_for_every_role() {
    let store = seeded_store();
    let enforcer = enforcer_over(&store);

    assert!(enforcer
        .revoke(PolicyColumn::Subject, &["", "/api/users/*"])
        .await
        .unwrap());

    assert!(!enforcer.check(RoleId(5), "GET", "/api/users/1").await.unwrap());
    assert!(!enforcer.check(RoleId(7), "GET", "/api/users/1").await.unwrap());
    assert!(enforcer.check(RoleId(5), "POST", "/api/orders").await.unwrap());
}

#[tokio::test]
async fn test_revoke_without_match_keeps_cache() {
    let store = seeded_store();
    let enforcer = enforcer_over(&store);
    enforcer.warm_up().await.unwrap();

    assert!(!enforcer.revoke(PolicyColumn::Subject, &["99"]).await.unwrap());
    assert_eq!(enforcer.cache_state(), CacheState::Ready);
    assert_eq!(store.loads(), 1);
}

#[tokio::test]
async fn test_revoke_rejects_empty_filter() {
    let store = seeded_store();
    let enforcer = enforcer_over(&store);

    let err = enforcer.revoke(PolicyColumn::Subject, &["", ""]).await.unwrap_err();
    assert!(matches!(err, WardenError::InvalidFilter(_)));
    assert_eq!(store.inner.len(), 3);
}

#[tokio::test]
async fn test_rename_across_roles_is_idempotent() {
    let store = seeded_store();
    let enforcer = enforcer_over(&store);

    let changed = enforcer
        .rename("/api/users/*", "GET", "/api/members/*", "GET")
        .await
        .unwrap();
    assert_eq!(changed, 2);

    assert!(enforcer.check(RoleId(5), "GET", "/api/members/1").await.unwrap());
    assert!(enforcer.check(RoleId(7), "GET", "/api/members/1").await.unwrap());
    assert!(!enforcer.check(RoleId(7), "GET", "/api/users/1").await.unwrap());

    let snapshot = store.inner.snapshot();
    let changed = enforcer
        .rename("/api/users/*", "GET", "/api/members/*", "GET")
        .await
        .unwrap();
    assert_eq!(changed, 0);
    assert_eq!(store.inner.snapshot(), snapshot);
}

#[tokio::test]
async fn test_eager_reload_rebuilds_on_write() {
    let store = seeded_store();
    let enforcer = PolicyEnforcer::new(
        store.clone(),
        &PolicyConfig::default().with_eager_reload(true),
    );

    enforcer.grant(RoleId(5), &[perm("/x", "GET")]).await.unwrap();
    assert_eq!(enforcer.cache_state(), CacheState::Ready);
    assert_eq!(store.loads(), 1);

    assert!(enforcer.check(RoleId(5), "GET", "/x").await.unwrap());
    assert_eq!(store.loads(), 1);
}

#[tokio::test]
async fn test_eager_reload_failure_reports_invalidation() {
    let store = seeded_store();
    let enforcer = PolicyEnforcer::new(
        store.clone(),
        &PolicyConfig::default().with_eager_reload(true),
    );

    store.set_down(true);
    let err = enforcer.grant(RoleId(5), &[perm("/x", "GET")]).await.unwrap_err();
    assert!(matches!(err, WardenError::InvalidationFailure(_)));

    // the write itself landed
    assert!(store.inner.snapshot().contains(&PolicyRule::new("5", "/x", "GET")));
}

// ============================================================================
// Matching and Defaults
// ============================================================================

#[tokio::test]
async fn test_empty_policy_denies_everything() {
    let store = Arc::new(CountingStore::default());
    let enforcer = enforcer_over(&store);

    assert!(!enforcer.check(RoleId(1), "GET", "/").await.unwrap());
    assert!(!enforcer.check(RoleId::ANONYMOUS, "GET", "/api").await.unwrap());
}

#[tokio::test]
async fn test_anonymous_role_is_denied_without_rules() {
    let store = seeded_store();
    let enforcer = enforcer_over(&store);
    assert!(!enforcer.check(RoleId::ANONYMOUS, "GET", "/api/users/1").await.unwrap());
}

#[tokio::test]
async fn test_path_patterns() {
    let store = Arc::new(CountingStore::seeded(vec![
        PolicyRule::new("1", "/api/users/:id", "GET"),
        PolicyRule::new("1", "/api/files/*", "GET"),
        PolicyRule::new("1", "/health", "GET"),
    ]));
    let enforcer = enforcer_over(&store);

    assert!(enforcer.check(RoleId(1), "GET", "/api/users/17").await.unwrap());
    assert!(!enforcer.check(RoleId(1), "GET", "/api/users/17/posts").await.unwrap());
    assert!(!enforcer.check(RoleId(1), "GET", "/api/users").await.unwrap());
    assert!(enforcer.check(RoleId(1), "GET", "/api/files/a/b/c").await.unwrap());
    assert!(enforcer.check(RoleId(1), "GET", "/health").await.unwrap());
    assert!(!enforcer.check(RoleId(1), "POST", "/health").await.unwrap());
    assert!(!enforcer.check(RoleId(1), "GET", "/healthz").await.unwrap());
}
