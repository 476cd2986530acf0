//! Axum middleware that enforces the policy on every request.
//!
//! The middleware reads the caller's role from the request extensions, asks
//! the enforcer about `(role, method, path)` and turns the answer into one of
//! three outcomes:
//!
//! - allowed: the request proceeds, with an [`AuthorizedRole`] extension;
//! - denied: `403 FORBIDDEN` for the client;
//! - error: `500 AUTHORIZATION_ERROR`, logged server-side. The request is
//!   never let through when the policy could not be evaluated.

use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{error, warn};

use super::context::role_id_from_extensions;
use super::enforcer::PolicyEnforcer;
use super::models::RoleId;
use crate::error::{ErrorCode, ErrorResponse, WardenError};

// ═══════════════════════════════════════════════════════════════════════════════
// Outcome
// ═══════════════════════════════════════════════════════════════════════════════

/// Authorization result as seen by the middleware.
///
/// Denials and failures are kept apart even though both stop the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    Allowed,
    Denied,
    Error(WardenError),
}

impl AuthorizationOutcome {
    pub fn from_check(result: crate::error::Result<bool>) -> Self {
        match result {
            Ok(true) => Self::Allowed,
            Ok(false) => Self::Denied,
            Err(err) => Self::Error(err),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// The response to send instead of calling the handler, if any.
    pub fn rejection(&self) -> Option<Response> {
        match self {
            Self::Allowed => None,
            Self::Denied => Some(
                (
                    StatusCode::FORBIDDEN,
                    Json(ErrorResponse::new(
                        ErrorCode::Forbidden,
                        "You do not have permission to access this resource",
                    )),
                )
                    .into_response(),
            ),
            Self::Error(_) => Some(
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::new(
                        ErrorCode::AuthorizationError,
                        "Authorization could not be evaluated",
                    )),
                )
                    .into_response(),
            ),
        }
    }
}

/// Inserted into request extensions once the policy allowed the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizedRole(pub RoleId);

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Layer that wraps services with policy enforcement.
///
/// # Example
///
/// ```rust,ignore
/// use warden_core::rbac::{EnforcePolicyLayer, PolicyEnforcer};
///
/// let app = Router::new()
///     .route("/api/users/:id", get(get_user))
///     .layer(EnforcePolicyLayer::new(enforcer.clone()));
/// ```
#[derive(Clone)]
pub struct EnforcePolicyLayer {
    enforcer: Arc<PolicyEnforcer>,
}

impl EnforcePolicyLayer {
    pub fn new(enforcer: Arc<PolicyEnforcer>) -> Self {
        Self { enforcer }
    }
}

impl<S> Layer<S> for EnforcePolicyLayer {
    type Service = EnforcePolicyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        EnforcePolicyService {
            inner,
            enforcer: self.enforcer.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Service that checks every request against the policy.
#[derive(Clone)]
pub struct EnforcePolicyService<S> {
    inner: S,
    enforcer: Arc<PolicyEnforcer>,
}

impl<S> Service<Request<Body>> for EnforcePolicyService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let enforcer = self.enforcer.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let role = role_id_from_extensions(request.extensions());
            let method = request.method().as_str().to_string();
            let path = request.uri().path().to_string();

            let outcome =
                AuthorizationOutcome::from_check(enforcer.check(role, &method, &path).await);

            match &outcome {
                AuthorizationOutcome::Allowed => {}
                AuthorizationOutcome::Denied => {
                    warn!(role_id = %role, method = %method, path = %path, "Permission denied");
                }
                AuthorizationOutcome::Error(err) => {
                    error!(
                        role_id = %role,
                        method = %method,
                        uri = %request.uri(),
                        error = %err,
                        "Policy evaluation failed"
                    );
                }
            }

            if let Some(rejection) = outcome.rejection() {
                return Ok(rejection);
            }

            request.extensions_mut().insert(AuthorizedRole(role));
            inner.call(request).await
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
