use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};

use crate::auth::Caller;
use crate::server::AppState;
use crate::server::dto::{
    CreateClassRequest, GradeParams, ListParams, MessageResponse, UpdateClassRequest,
};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::server::validation::{non_blank, require_fields};
use crate::store::{ClassFilter, ClassUpdate, GradeFilter};
use crate::types::NewClass;

pub fn classes_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/classes", get(list_classes).post(create_class))
        .route("/classes/grade/{level}", get(classes_by_grade))
        .route("/classes/{id}", put(update_class).delete(archive_class))
}

async fn list_classes(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    let filter = ClassFilter {
        department: non_blank(params.department),
        status: Some(non_blank(params.status).unwrap_or_else(|| "active".to_string())),
    };
    let scope = identity.scope();

    let classes = state
        .db(move |store| store.list_classes(&filter, &scope))
        .await
        .api_err("Failed to list classes")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(classes)))
}

async fn classes_by_grade(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(level): Path<i64>,
    Query(params): Query<GradeParams>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    let filter = GradeFilter {
        level,
        academic_year: non_blank(params.academic_year),
        section: non_blank(params.section),
    };
    let scope = identity.scope();

    let classes = state
        .db(move |store| store.list_classes_by_grade(&filter, &scope))
        .await
        .api_err("Failed to list classes")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(classes)))
}

async fn create_class(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateClassRequest>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    identity.require_manager()?;

    require_fields(&[
        ("name", req.name.as_deref()),
        ("department", req.department.as_deref()),
    ])?;

    let class = NewClass {
        name: req.name.unwrap_or_default().trim().to_string(),
        department: req.department.unwrap_or_default().trim().to_string(),
        teacher_id: non_blank(req.teacher_id),
        room: non_blank(req.room),
        schedule: non_blank(req.schedule),
        capacity: req.capacity,
        grade_level: req.grade_level,
        section: non_blank(req.section),
        academic_year: non_blank(req.academic_year),
        grade_category: non_blank(req.grade_category),
        institution_id: identity.institution_id,
    };

    let created = state
        .db(move |store| store.create_class(&class))
        .await
        .api_err("Failed to create class")?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

async fn update_class(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateClassRequest>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    identity.require_manager()?;

    let update = ClassUpdate {
        name: non_blank(req.name),
        department: non_blank(req.department),
        teacher_id: non_blank(req.teacher_id),
        room: non_blank(req.room),
        schedule: non_blank(req.schedule),
        capacity: req.capacity,
        status: non_blank(req.status),
        grade_level: req.grade_level,
        section: non_blank(req.section),
        academic_year: non_blank(req.academic_year),
        grade_category: non_blank(req.grade_category),
    };
    let scope = identity.scope();

    let class = state
        .db(move |store| store.update_class(id, &update, &scope))
        .await
        .api_err("Failed to update class")?
        .or_not_found("Class not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(class)))
}

/// Soft delete: the row stays with status `deleted`.
async fn archive_class(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    identity.require_manager()?;
    let scope = identity.scope();

    let archived = state
        .db(move |store| store.archive_class(id, &scope))
        .await
        .api_err("Failed to delete class")?;
    if !archived {
        return Err(ApiError::not_found("Class not found"));
    }

    Ok::<_, ApiError>(Json(ApiResponse::success(MessageResponse::new(
        "Class deleted successfully",
    ))))
}
