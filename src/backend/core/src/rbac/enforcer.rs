//! Policy enforcer: the check path and the administration operations.
//!
//! The enforcer answers the question:
//! "May role R invoke HTTP method M on path P?"
//!
//! Every administration operation writes through to the policy store first
//! and then invalidates the cache. A write whose invalidation cannot be
//! confirmed is reported as an error even though the store accepted it.

use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cache::{CacheHandle, CacheState, PolicyCache};
use super::models::{
    validate_method, validate_path, PermissionRecord, PolicyColumn, PolicyFilter, PolicyRule,
    RoleId,
};
use super::store::{first_duplicate, PolicyStore};
use crate::config::PolicyConfig;
use crate::error::{Result, WardenError};

// ═══════════════════════════════════════════════════════════════════════════════
// Decision
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny,
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny)
    }

    fn as_label(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl From<bool> for PolicyDecision {
    fn from(allowed: bool) -> Self {
        if allowed {
            Self::Allow
        } else {
            Self::Deny
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Enforcer
// ═══════════════════════════════════════════════════════════════════════════════

/// Cached RBAC enforcer over a [`PolicyStore`].
///
/// Cheap to clone; clones share one cache, so one enforcer per process is
/// the intended shape.
#[derive(Clone)]
pub struct PolicyEnforcer {
    store: Arc<dyn PolicyStore>,
    cache: PolicyCache,
}

impl std::fmt::Debug for PolicyEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEnforcer")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl PolicyEnforcer {
    pub fn new(store: Arc<dyn PolicyStore>, config: &PolicyConfig) -> Self {
        let cache = PolicyCache::new(Arc::clone(&store), config);
        Self { store, cache }
    }

    pub fn cache(&self) -> &PolicyCache {
        &self.cache
    }

    pub fn cache_state(&self) -> CacheState {
        self.cache.state()
    }

    /// Load the cache now instead of on the first check.
    pub async fn warm_up(&self) -> Result<Arc<CacheHandle>> {
        self.cache.ensure_loaded().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Authorization checks
    // ─────────────────────────────────────────────────────────────────────────

    /// Decide whether `role` may invoke `method` on `path`.
    ///
    /// Errors when the cache cannot be (re)built; it never falls back to a
    /// blanket allow or deny.
    pub async fn check(&self, role: RoleId, method: &str, path: &str) -> Result<bool> {
        Ok(self.decide(role, method, path).await?.is_allowed())
    }

    pub async fn decide(&self, role: RoleId, method: &str, path: &str) -> Result<PolicyDecision> {
        let handle = self.cache.ensure_loaded().await?;
        let decision = PolicyDecision::from(handle.allows(&role.subject(), method, path));

        counter!("warden_policy_checks_total", "decision" => decision.as_label()).increment(1);
        debug!(
            role_id = %role,
            method,
            path,
            epoch = handle.epoch(),
            decision = decision.as_label(),
            "Policy check"
        );
        Ok(decision)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Administration
    // ─────────────────────────────────────────────────────────────────────────

    /// Permissions currently granted to `role`, in store order.
    pub async fn list(&self, role: RoleId) -> Result<Vec<PermissionRecord>> {
        let handle = self.cache.ensure_loaded().await?;
        Ok(handle.permissions_for(&role.subject()))
    }

    /// Replace the full permission set of `role` with `permissions`.
    ///
    /// Either the whole replacement lands or the role keeps its previous
    /// permissions. Duplicate entries fail with `DuplicateRule`.
    pub async fn grant(&self, role: RoleId, permissions: &[PermissionRecord]) -> Result<()> {
        for permission in permissions {
            permission.validate()?;
        }

        let rules: Vec<PolicyRule> = permissions
            .iter()
            .map(|permission| PolicyRule::for_role(role, permission))
            .collect();

        if let Some(dup) = first_duplicate(&rules) {
            warn!(role_id = %role, rule = %dup, "Rejected grant with duplicate permission");
            return Err(WardenError::duplicate(dup.to_string()));
        }

        self.store.replace_subject(&role.subject(), &rules).await?;
        info!(role_id = %role, permissions = rules.len(), "Replaced role permissions");

        self.invalidate().await
    }

    /// Remove every rule matching `values` starting at `column`.
    ///
    /// An empty value matches anything in its column. Returns whether any
    /// rule was removed; the cache is only invalidated when one was.
    pub async fn revoke(&self, column: PolicyColumn, values: &[&str]) -> Result<bool> {
        let filter = PolicyFilter::new(column, values.iter().map(|v| v.to_string()).collect())?;
        self.revoke_where(&filter).await
    }

    /// The positional `(column index, values...)` form of [`revoke`](Self::revoke).
    pub async fn revoke_by_index(&self, column: usize, values: &[&str]) -> Result<bool> {
        self.revoke(PolicyColumn::try_from(column)?, values).await
    }

    pub async fn revoke_where(&self, filter: &PolicyFilter) -> Result<bool> {
        let removed = self.store.delete_where(filter).await?;

        if removed {
            info!(column = %filter.column(), values = ?filter.values(), "Revoked permissions");
            self.invalidate().await?;
        } else {
            debug!(column = %filter.column(), values = ?filter.values(), "Revoke matched nothing");
        }
        Ok(removed)
    }

    /// Retarget every rule on `(old_path, old_method)` to `(new_path, new_method)`
    /// for all roles. Returns how many rules changed; zero is not an error.
    pub async fn rename(
        &self,
        old_path: &str,
        old_method: &str,
        new_path: &str,
        new_method: &str,
    ) -> Result<u64> {
        validate_path(new_path)?;
        validate_method(new_method)?;

        let changed = self
            .store
            .update_where(
                &[
                    (PolicyColumn::Object, old_path.to_string()),
                    (PolicyColumn::Action, old_method.to_string()),
                ],
                &[
                    (PolicyColumn::Object, new_path.to_string()),
                    (PolicyColumn::Action, new_method.to_string()),
                ],
            )
            .await?;

        info!(
            old_path,
            old_method,
            new_path,
            new_method,
            changed,
            "Renamed permission"
        );

        self.invalidate().await?;
        Ok(changed)
    }

    /// Mark the cached snapshot stale.
    pub async fn invalidate(&self) -> Result<()> {
        self.cache.invalidate().await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
