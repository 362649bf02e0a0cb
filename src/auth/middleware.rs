use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;

use super::helpers::{authenticate, extract_bearer_token};
use crate::config::AuthMode;
use crate::server::AppState;
use crate::server::response::ApiError;
use crate::types::{Role, TenantScope, User};

/// Who is making a request.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    /// `None` only for the demo-mode guest.
    #[serde(rename = "id")]
    pub user_id: Option<i64>,
    pub username: String,
    pub role: Role,
    pub name: String,
    pub institution_id: Option<i64>,
    pub institution_name: Option<String>,
    #[serde(skip)]
    pub session_id: Option<String>,
}

impl Identity {
    #[must_use]
    pub fn from_user(user: User, institution_name: Option<String>, session_id: Option<String>) -> Self {
        Self {
            user_id: Some(user.id),
            username: user.username,
            role: user.role,
            name: user.name,
            institution_id: user.institution_id,
            institution_name,
            session_id,
        }
    }

    /// The low-privilege identity used for unauthenticated callers in demo mode.
    #[must_use]
    pub fn guest() -> Self {
        Self {
            user_id: None,
            username: "guest".to_string(),
            role: Role::Demo,
            name: "Guest".to_string(),
            institution_id: None,
            institution_name: None,
            session_id: None,
        }
    }

    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.user_id.is_none()
    }

    /// Rows this identity may see.
    ///
    /// Superadmins see everything and callers bound to an institution see
    /// only that institution. An admin with no institution is limited to
    /// unassigned rows.
    #[must_use]
    pub fn scope(&self) -> TenantScope {
        match (self.role, self.institution_id) {
            (Role::Superadmin, _) => TenantScope::All,
            (_, Some(id)) => TenantScope::Institution(id),
            (Role::Admin, None) => TenantScope::Unassigned,
            (_, None) => TenantScope::All,
        }
    }

    pub fn require_superadmin(&self) -> Result<(), AuthError> {
        if self.role == Role::Superadmin {
            Ok(())
        } else {
            Err(AuthError::Forbidden("Superadmin access required"))
        }
    }

    pub fn require_manager(&self) -> Result<(), AuthError> {
        if self.role.can_manage_people() {
            Ok(())
        } else {
            Err(AuthError::Forbidden("Admin access required"))
        }
    }

    pub fn require_scheduler(&self) -> Result<(), AuthError> {
        if self.role.can_schedule() {
            Ok(())
        } else {
            Err(AuthError::Forbidden("Teacher or admin access required"))
        }
    }
}

/// Result of inspecting a request's credentials. Extraction never rejects;
/// handlers decide what an unauthenticated caller may do.
#[derive(Debug)]
pub enum Caller {
    Authenticated(Identity),
    Unauthenticated(AuthError),
}

impl Caller {
    /// Resolves the caller under `mode`: strict mode turns an unauthenticated
    /// caller into a 401, demo mode into the guest identity.
    pub fn require(self, mode: AuthMode) -> Result<Identity, AuthError> {
        match (self, mode) {
            (Caller::Authenticated(identity), _) => Ok(identity),
            (Caller::Unauthenticated(AuthError::Internal), _) => Err(AuthError::Internal),
            (Caller::Unauthenticated(_), AuthMode::Demo) => Ok(Identity::guest()),
            (Caller::Unauthenticated(reason), AuthMode::Strict) => Err(reason),
        }
    }

    /// Like [`Caller::require`] but never falls back to the guest.
    pub fn require_session(self) -> Result<Identity, AuthError> {
        match self {
            Caller::Authenticated(identity) => Ok(identity),
            Caller::Unauthenticated(reason) => Err(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    MissingAuth,
    InvalidScheme,
    InvalidToken,
    TokenExpired,
    Forbidden(&'static str),
    Internal,
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        let (status, message) = match e {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidScheme => (StatusCode::UNAUTHORIZED, "Invalid authorization scheme"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token"),
            AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "Token expired"),
            AuthError::Forbidden(message) => (StatusCode::FORBIDDEN, message),
            AuthError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };
        ApiError {
            status,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        let raw_token = match extract_bearer_token(auth_header) {
            Ok(Some(token)) => token.to_string(),
            Ok(None) => return Ok(Caller::Unauthenticated(AuthError::MissingAuth)),
            Err(reason) => return Ok(Caller::Unauthenticated(reason)),
        };

        let outcome = state
            .db(move |store| Ok(authenticate(store, &raw_token, Utc::now())))
            .await
            .map_err(|e| {
                tracing::error!("Session lookup failed: {e}");
                AuthError::Internal
            })?;

        Ok(match outcome {
            Ok(identity) => Caller::Authenticated(identity),
            Err(AuthError::Internal) => return Err(AuthError::Internal),
            Err(reason) => Caller::Unauthenticated(reason),
        })
    }
}
