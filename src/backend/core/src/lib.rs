//! # Warden Core
//!
//! Cached role-based access control for HTTP services.
//!
//! ## Architecture
//!
//! - **RBAC**: policy rules, keyMatch2 path matching, a single-flight policy
//!   cache with invalidation, and the administration operations
//! - **Middleware**: a tower layer that turns policy decisions into responses
//! - **Database**: a PostgreSQL policy store over the `casbin_rule` table
//! - **Telemetry**: structured logging in JSON or human-readable formats
//! - **Config**: layered file and environment configuration

pub mod config;
pub mod db;
pub mod error;
pub mod rbac;
pub mod telemetry;

pub use error::{ErrorCode, ErrorSeverity, Result, WardenError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, DatabaseConfig, ObservabilityConfig, PolicyConfig};
    pub use crate::db::{Database, PgPolicyStore};
    pub use crate::error::{ErrorCode, ErrorResponse, ErrorSeverity, Result, WardenError};
    pub use crate::rbac::{
        AuthorizationOutcome, AuthorizedRole, CacheState, Claims, CurrentRole,
        EnforcePolicyLayer, EnforcePolicyService, MemoryPolicyStore, PermissionRecord,
        PolicyCache, PolicyColumn, PolicyDecision, PolicyEnforcer, PolicyFilter, PolicyRule,
        PolicyStore, RoleId,
    };
}
