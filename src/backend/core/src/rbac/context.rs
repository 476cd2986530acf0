//! Caller identity carried in request extensions.
//!
//! An upstream authentication layer verifies the bearer token and inserts the
//! decoded [`Claims`] into the request extensions. This module only reads
//! them back; a request with no claims, or with a role id that does not
//! parse, is treated as anonymous (`RoleId(0)`).

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, Extensions},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

use super::models::RoleId;

/// Identity claims of an authenticated caller.
///
/// Ids are strings because that is how the token encodes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub role_id: String,
}

impl Claims {
    pub fn new(user_id: impl Into<String>, role_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role_id: role_id.into(),
        }
    }

    pub fn role(&self) -> RoleId {
        RoleId::parse(&self.role_id).unwrap_or(RoleId::ANONYMOUS)
    }

    /// Numeric user id, `0` when it does not parse.
    pub fn user(&self) -> i64 {
        self.user_id.trim().parse().unwrap_or(0)
    }
}

/// Role of the caller, or `RoleId::ANONYMOUS` without claims.
pub fn role_id_from_extensions(extensions: &Extensions) -> RoleId {
    extensions
        .get::<Claims>()
        .map(Claims::role)
        .unwrap_or(RoleId::ANONYMOUS)
}

/// User id of the caller, or `0` without claims.
pub fn user_id_from_extensions(extensions: &Extensions) -> i64 {
    extensions.get::<Claims>().map(Claims::user).unwrap_or(0)
}

/// Axum extractor for the caller's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentRole(pub RoleId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentRole
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(role_id_from_extensions(&parts.extensions)))
    }
}
