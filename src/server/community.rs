use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;

use crate::auth::Caller;
use crate::server::AppState;
use crate::server::dto::{CreateAnnouncementRequest, CreateParentRequest};
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};
use crate::server::validation::{non_blank, require_fields};
use crate::store::NewParent;
use crate::types::{AnnouncementPriority, Audience, NewAnnouncement};

pub fn community_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/parents", get(list_parents).post(create_parent))
        .route(
            "/announcements",
            get(list_announcements).post(create_announcement),
        )
}

async fn list_parents(caller: Caller, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    let scope = identity.scope();

    let parents = state
        .db(move |store| store.list_parents(&scope))
        .await
        .api_err("Failed to list parents")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(parents)))
}

async fn create_parent(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateParentRequest>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    identity.require_manager()?;
    require_fields(&[("name", req.name.as_deref())])?;

    let parent = NewParent {
        name: req.name.unwrap_or_default().trim().to_string(),
        email: non_blank(req.email),
        phone: non_blank(req.phone),
        address: non_blank(req.address),
        student_ids: req
            .student_ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect(),
        institution_id: identity.institution_id,
    };

    let created = state
        .db(move |store| store.create_parent(&parent))
        .await
        .api_err("Failed to create parent")?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

/// Published announcements that have not expired, newest first.
async fn list_announcements(
    caller: Caller,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    let scope = identity.scope();
    let now = Utc::now();

    let announcements = state
        .db(move |store| store.list_announcements(&scope, now))
        .await
        .api_err("Failed to list announcements")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(announcements)))
}

async fn create_announcement(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAnnouncementRequest>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    identity.require_manager()?;

    require_fields(&[
        ("title", req.title.as_deref()),
        ("content", req.content.as_deref()),
    ])?;

    let target_audience = non_blank(req.target_audience)
        .map(|a| a.parse::<Audience>())
        .transpose()
        .api_err("Invalid target audience")?
        .unwrap_or_default();
    let priority = non_blank(req.priority)
        .map(|p| p.parse::<AnnouncementPriority>())
        .transpose()
        .api_err("Invalid priority")?
        .unwrap_or_default();

    let announcement = NewAnnouncement {
        title: req.title.unwrap_or_default().trim().to_string(),
        content: req.content.unwrap_or_default(),
        target_audience,
        priority,
        institution_id: identity.institution_id,
        created_by: identity.user_id,
        expires_at: req.expires_at,
    };

    let created = state
        .db(move |store| store.create_announcement(&announcement))
        .await
        .api_err("Failed to create announcement")?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(created))))
}
