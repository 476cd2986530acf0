//! Role-based access control over `(role, path, method)` rules.
//!
//! This module provides:
//! - **Models**: policy rules, permission records and revoke filters
//! - **Matcher**: keyMatch2-style path patterns compiled per role and method
//! - **Store**: the durable rule table seam, with an in-memory implementation
//! - **Cache**: a lazily built, single-flight snapshot of the whole policy
//! - **Enforcer**: the check path plus grant, revoke, list and rename
//! - **Middleware**: a tower layer that enforces the policy per request
//!
//! # Usage
//!
//! ```rust,ignore
//! use warden_core::rbac::{EnforcePolicyLayer, PermissionRecord, PolicyEnforcer, RoleId};
//!
//! let enforcer = Arc::new(PolicyEnforcer::new(store, &config.policy));
//!
//! // Replace the permissions of role 5
//! enforcer
//!     .grant(RoleId(5), &[PermissionRecord::new("/api/users/*", "GET")])
//!     .await?;
//!
//! // Check programmatically
//! let allowed = enforcer.check(RoleId(5), "GET", "/api/users/17").await?;
//!
//! // Use as Axum middleware
//! let app = Router::new()
//!     .route("/api/users/:id", get(get_user))
//!     .layer(EnforcePolicyLayer::new(enforcer.clone()));
//! ```

pub mod cache;
pub mod context;
pub mod enforcer;
pub mod matcher;
pub mod middleware;
pub mod models;
pub mod store;

pub use cache::{CacheHandle, CacheState, PolicyCache};
pub use context::{role_id_from_extensions, user_id_from_extensions, Claims, CurrentRole};
pub use enforcer::{PolicyDecision, PolicyEnforcer};
pub use matcher::{PathPattern, PolicyMatcher};
pub use middleware::{
    AuthorizationOutcome, AuthorizedRole, EnforcePolicyLayer, EnforcePolicyService,
};
pub use models::{PermissionRecord, PolicyColumn, PolicyFilter, PolicyRule, RoleId};
pub use store::{MemoryPolicyStore, PolicyStore};
