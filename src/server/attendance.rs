use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use crate::auth::Caller;
use crate::ingest::{BatchMode, BatchReport, RealtimeEvent, parse_attendance_csv};
use crate::server::AppState;
use crate::server::dto::{AttendanceParams, PublicAttendanceParams, UploadSummary};
use crate::server::multipart::spool_upload;
use crate::server::response::{ApiError, ApiResponse, StoreResultExt, clamp_limit};
use crate::server::validation::non_blank;
use crate::store::AttendanceFilter;
use crate::types::{RecordStatus, TenantScope};

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 1000;
const DEFAULT_PUBLIC_LIMIT: i64 = 10;
const MAX_PUBLIC_LIMIT: i64 = 100;
const CSV_FIELD: &str = "csvFile";
/// Uploads stream to a temp file, so this only bounds disk use per request.
const MAX_CSV_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

pub fn attendance_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_attendance))
        .route("/public", get(public_attendance))
        .route(
            "/upload",
            post(upload_attendance).layer(DefaultBodyLimit::max(MAX_CSV_UPLOAD_BYTES)),
        )
        .route("/realtime", post(realtime_attendance))
        .route("/stats", get(attendance_stats))
}

async fn list_attendance(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Query(params): Query<AttendanceParams>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;

    let status = non_blank(params.status)
        .map(|s| s.parse::<RecordStatus>())
        .transpose()
        .api_err("Invalid status")?;

    let filter = AttendanceFilter {
        date: non_blank(params.date),
        student_id: non_blank(params.student_id),
        department: non_blank(params.department),
        status,
        limit: clamp_limit(params.limit, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT),
    };
    let scope = identity.scope();

    let records = state
        .db(move |store| store.list_attendance(&filter, &scope))
        .await
        .api_err("Failed to fetch attendance")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(records)))
}

/// Unauthenticated feed for live boards.
async fn public_attendance(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PublicAttendanceParams>,
) -> impl IntoResponse {
    let limit = clamp_limit(params.limit, DEFAULT_PUBLIC_LIMIT, MAX_PUBLIC_LIMIT);
    let code = non_blank(params.institution_code);

    let records = state
        .db(move |store| {
            let scope = match code {
                Some(code) => match store.get_institution_by_code(&code)? {
                    Some(institution) => TenantScope::Institution(institution.id),
                    None => return Ok(Vec::new()),
                },
                None => TenantScope::All,
            };
            let filter = AttendanceFilter {
                limit,
                ..AttendanceFilter::default()
            };
            store.list_attendance(&filter, &scope)
        })
        .await
        .api_err("Failed to fetch attendance")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(records)))
}

async fn upload_attendance(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    if identity.is_guest() {
        return Err(ApiError::forbidden("Sign in to upload attendance"));
    }
    let spool_dir = state.config.data_dir.join("tmp");
    let upload = spool_upload(multipart, CSV_FIELD, &spool_dir).await?;

    let mode = upload
        .text_fields
        .get("mode")
        .map(|m| m.parse::<BatchMode>())
        .transpose()
        .api_err("Invalid batch mode")?
        .unwrap_or_default();
    let institution_id = identity.institution_id;
    let file = upload.file;

    let (skipped, report) = state
        .db(move |store| {
            let parsed = parse_attendance_csv(file.reopen()?, institution_id)?;
            let report = if parsed.records.is_empty() {
                BatchReport::default()
            } else {
                store.insert_attendance(&parsed.records, mode)?
            };
            Ok((parsed.skipped, report))
        })
        .await
        .api_err("Failed to process attendance data")?;

    tracing::info!(
        "Attendance upload by {}: {} of {} rows inserted, {} skipped, mode {}",
        identity.username,
        report.inserted,
        report.submitted,
        skipped,
        mode
    );

    Ok::<_, ApiError>(Json(ApiResponse::success(UploadSummary {
        message: format!("{} attendance records processed", report.inserted),
        mode,
        count: report.inserted,
        skipped,
        failed: report.failed,
    })))
}

/// Single event from the face-recognition feed. An institution code that
/// cannot be resolved leaves the record unscoped.
async fn realtime_attendance(
    State(state): State<Arc<AppState>>,
    Json(event): Json<RealtimeEvent>,
) -> impl IntoResponse {
    let code = non_blank(event.institution_code.clone());
    let institution_id = match code {
        Some(code) => {
            let lookup = code.clone();
            match state
                .db(move |store| store.get_institution_by_code(&lookup))
                .await
            {
                Ok(Some(institution)) => Some(institution.id),
                Ok(None) => {
                    tracing::warn!("Unknown institution code {code}, recording unscoped");
                    None
                }
                Err(e) => {
                    tracing::warn!("Failed to resolve institution code {code}: {e}");
                    None
                }
            }
        }
        None => None,
    };

    let record = event.into_record(institution_id).api_err("Invalid attendance event")?;
    let stored = record.clone();

    state
        .db(move |store| store.insert_attendance(&[stored], BatchMode::Atomic))
        .await
        .api_err("Failed to record attendance")?;

    tracing::info!(
        "Realtime attendance for {} at {} {}",
        record.student_id,
        record.date,
        record.time
    );

    Ok::<_, ApiError>(Json(ApiResponse::success(record)))
}

async fn attendance_stats(caller: Caller, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    let scope = identity.scope();
    let today = Utc::now().date_naive();

    let stats = state
        .db(move |store| store.attendance_stats(&scope, today))
        .await
        .api_err("Failed to get attendance statistics")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(stats)))
}
