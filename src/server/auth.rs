use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};

use crate::auth::{Caller, Identity, issue_session, verify_password};
use crate::server::AppState;
use crate::server::dto::{LoginRequest, LoginResponse, MessageResponse};
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};

pub fn auth_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let (Some(username), Some(password)) = (req.username, req.password) else {
        return Err(ApiError::bad_request("Username and password are required"));
    };
    if username.trim().is_empty() || password.is_empty() {
        return Err(ApiError::bad_request("Username and password are required"));
    }

    let ttl = state.config.session_ttl_hours;
    let (token, identity) = state
        .db(move |store| {
            let Some(user) = store.get_user_by_username(username.trim())? else {
                return Ok(None);
            };
            if !verify_password(&password, &user.password_hash)? {
                return Ok(None);
            }

            let institution_name = match user.institution_id {
                Some(id) => store.get_institution(id)?.map(|i| i.name),
                None => None,
            };
            let issued = issue_session(store, &user, ttl)?;
            Ok(Some((issued.raw, Identity::from_user(user, institution_name, None))))
        })
        .await
        .api_err("Failed to log in")?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    tracing::info!("User {} logged in", identity.username);

    Ok::<_, ApiError>(Json(ApiResponse::success(LoginResponse {
        token,
        user: identity,
    })))
}

async fn logout(caller: Caller, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let identity = caller.require_session()?;
    let Some(session_id) = identity.session_id else {
        return Err(ApiError::unauthorized("Authentication required"));
    };

    state
        .db(move |store| store.delete_session(&session_id))
        .await
        .api_err("Failed to end session")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(MessageResponse::new("Logged out"))))
}

async fn me(caller: Caller, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    Ok::<_, ApiError>(Json(ApiResponse::success(identity)))
}
