//! The policy store seam and an in-process implementation.
//!
//! The store is the durable source of truth; the policy cache only ever
//! holds a point-in-time copy of `load_all`.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use tracing::debug;

use super::models::{PolicyColumn, PolicyFilter, PolicyRule};
use crate::error::{Result, WardenError};

/// Durable table of policy rules.
///
/// Implementations must reject duplicate `(subject, object, action)` triples
/// with `WardenError::DuplicateRule` and leave their contents unchanged when
/// any write fails.
#[async_trait]
pub trait PolicyStore: Send + Sync + 'static {
    /// Read every rule, in store order.
    async fn load_all(&self) -> Result<Vec<PolicyRule>>;

    /// Insert all rules or none.
    async fn insert_many(&self, rules: &[PolicyRule]) -> Result<()>;

    /// Delete rules matching the filter. Returns whether anything was removed.
    async fn delete_where(&self, filter: &PolicyFilter) -> Result<bool>;

    /// Set `updates` on every rule whose `predicate` columns all match.
    /// Returns the number of rules changed.
    async fn update_where(
        &self,
        predicate: &[(PolicyColumn, String)],
        updates: &[(PolicyColumn, String)],
    ) -> Result<u64>;

    /// Replace every rule of `subject` with `rules` in one transaction.
    async fn replace_subject(&self, subject: &str, rules: &[PolicyRule]) -> Result<()>;
}

/// Find the first triple that appears twice in `rules`.
pub(crate) fn first_duplicate<'a, I>(rules: I) -> Option<&'a PolicyRule>
where
    I: IntoIterator<Item = &'a PolicyRule>,
{
    let mut seen = HashSet::new();
    rules.into_iter().find(|rule| !seen.insert(*rule))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Memory Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Policy store backed by a vector under a lock.
///
/// Every write computes the complete next state first and only swaps it in
/// once the uniqueness check passes, so a failed write changes nothing.
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    rules: RwLock<Vec<PolicyRule>>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with rules. Duplicate triples are rejected.
    pub fn with_rules(rules: Vec<PolicyRule>) -> Result<Self> {
        if let Some(dup) = first_duplicate(&rules) {
            return Err(WardenError::duplicate(dup.to_string()));
        }
        Ok(Self {
            rules: RwLock::new(rules),
        })
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// Snapshot of the current contents.
    pub fn snapshot(&self) -> Vec<PolicyRule> {
        self.rules.read().clone()
    }

    fn commit(&self, guard: &mut Vec<PolicyRule>, next: Vec<PolicyRule>) -> Result<()> {
        if let Some(dup) = first_duplicate(&next) {
            return Err(WardenError::duplicate(dup.to_string()));
        }
        *guard = next;
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn load_all(&self) -> Result<Vec<PolicyRule>> {
        Ok(self.snapshot())
    }

    async fn insert_many(&self, rules: &[PolicyRule]) -> Result<()> {
        let mut guard = self.rules.write();
        let mut next = guard.clone();
        next.extend_from_slice(rules);
        self.commit(&mut guard, next)?;
        debug!(inserted = rules.len(), "Inserted policy rules");
        Ok(())
    }

    async fn delete_where(&self, filter: &PolicyFilter) -> Result<bool> {
        let mut guard = self.rules.write();
        let before = guard.len();
        guard.retain(|rule| !filter.matches(rule));
        let removed = before - guard.len();
        debug!(removed, column = %filter.column(), "Deleted policy rules");
        Ok(removed > 0)
    }

    async fn update_where(
        &self,
        predicate: &[(PolicyColumn, String)],
        updates: &[(PolicyColumn, String)],
    ) -> Result<u64> {
        let mut guard = self.rules.write();
        let mut next = guard.clone();
        let mut changed = 0u64;

        for rule in next.iter_mut() {
            if predicate.iter().all(|(column, value)| rule.field(*column) == value) {
                for (column, value) in updates {
                    rule.set_field(*column, value.as_str());
                }
                changed += 1;
            }
        }

        if changed > 0 {
            self.commit(&mut guard, next)?;
        }
        Ok(changed)
    }

    async fn replace_subject(&self, subject: &str, rules: &[PolicyRule]) -> Result<()> {
        let mut guard = self.rules.write();
        let mut next: Vec<PolicyRule> = guard
            .iter()
            .filter(|rule| rule.subject != subject)
            .cloned()
            .collect();
        next.extend_from_slice(rules);
        self.commit(&mut guard, next)?;
        debug!(subject, rules = rules.len(), "Replaced subject rules");
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
