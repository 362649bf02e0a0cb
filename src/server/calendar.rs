use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};
use chrono::Utc;

use crate::auth::{Caller, Identity};
use crate::server::AppState;
use crate::server::dto::{EventParams, EventRequest, MessageResponse};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::server::validation::{non_blank, require_fields, validate_date};
use crate::store::{EventChanges, EventFilter};
use crate::types::{CalendarEvent, EventType, NewCalendarEvent};

pub fn calendar_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", get(list_events).post(create_event))
        .route("/events/{id}", put(update_event).delete(delete_event))
        .route("/events/{year}/{month}", get(month_events))
        .route("/today", get(today_events))
}

fn parse_event_type(value: &str) -> Result<EventType, ApiError> {
    value.parse::<EventType>().api_err("Invalid event type")
}

/// Validated body shared by create and update.
fn event_changes(req: EventRequest) -> Result<EventChanges, ApiError> {
    require_fields(&[
        ("title", req.title.as_deref()),
        ("event_type", req.event_type.as_deref()),
        ("start_date", req.start_date.as_deref()),
    ])?;

    let start_date = req.start_date.unwrap_or_default().trim().to_string();
    validate_date(&start_date, "start_date")?;
    let end_date = non_blank(req.end_date);
    if let Some(end) = &end_date {
        validate_date(end, "end_date")?;
    }

    Ok(EventChanges {
        title: req.title.unwrap_or_default().trim().to_string(),
        description: non_blank(req.description),
        event_type: parse_event_type(req.event_type.unwrap_or_default().trim())?,
        start_date,
        end_date,
        start_time: non_blank(req.start_time),
        end_time: non_blank(req.end_time),
        class_id: req.class_id,
    })
}

async fn fetch_events(
    state: &AppState,
    identity: &Identity,
    filter: EventFilter,
) -> Result<Json<ApiResponse<Vec<CalendarEvent>>>, ApiError> {
    let scope = identity.scope();
    let events = state
        .db(move |store| store.list_events(&filter, &scope))
        .await
        .api_err("Failed to fetch calendar events")?;
    Ok(Json(ApiResponse::success(events)))
}

async fn list_events(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventParams>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;

    let filter = EventFilter {
        start_date: non_blank(params.start_date),
        end_date: non_blank(params.end_date),
        event_type: non_blank(params.event_type)
            .map(|t| parse_event_type(&t))
            .transpose()?,
        class_id: params.class_id,
    };

    fetch_events(&state, &identity, filter).await
}

async fn month_events(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path((year, month)): Path<(i32, u32)>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    if !(1..=12).contains(&month) {
        return Err(ApiError::bad_request("month must be between 1 and 12"));
    }

    let filter = EventFilter {
        start_date: Some(format!("{year:04}-{month:02}-01")),
        end_date: Some(format!("{year:04}-{month:02}-31")),
        ..EventFilter::default()
    };

    fetch_events(&state, &identity, filter).await
}

async fn today_events(caller: Caller, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();

    let filter = EventFilter {
        start_date: Some(today.clone()),
        end_date: Some(today),
        ..EventFilter::default()
    };

    fetch_events(&state, &identity, filter).await
}

async fn create_event(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Json(req): Json<EventRequest>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    identity.require_scheduler()?;

    let changes = event_changes(req)?;
    let event = NewCalendarEvent {
        title: changes.title,
        description: changes.description,
        event_type: changes.event_type,
        start_date: changes.start_date,
        end_date: changes.end_date,
        start_time: changes.start_time,
        end_time: changes.end_time,
        class_id: changes.class_id,
        institution_id: identity.institution_id,
        created_by: identity.user_id,
    };

    let created = state
        .db(move |store| store.create_event(&event))
        .await
        .api_err("Failed to create event")?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

async fn update_event(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<EventRequest>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    identity.require_scheduler()?;

    let changes = event_changes(req)?;
    let scope = identity.scope();

    let event = state
        .db(move |store| store.update_event(id, &changes, &scope))
        .await
        .api_err("Failed to update event")?
        .or_not_found("Event not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(event)))
}

async fn delete_event(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    identity.require_scheduler()?;
    let scope = identity.scope();

    let deleted = state
        .db(move |store| store.delete_event(id, &scope))
        .await
        .api_err("Failed to delete event")?;
    if !deleted {
        return Err(ApiError::not_found("Event not found"));
    }

    Ok::<_, ApiError>(Json(ApiResponse::success(MessageResponse::new(
        "Event deleted successfully",
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> EventRequest {
        EventRequest {
            title: Some("Midterm".into()),
            event_type: Some("exam".into()),
            start_date: Some("2025-03-14".into()),
            ..EventRequest::default()
        }
    }

    #[test]
    fn test_event_changes_validates_type_and_dates() {
        let changes = event_changes(request()).unwrap();
        assert_eq!(changes.event_type, EventType::Exam);

        let err = event_changes(EventRequest {
            event_type: Some("party".into()),
            ..request()
        })
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = event_changes(EventRequest {
            start_date: Some("14/03/2025".into()),
            ..request()
        })
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = event_changes(EventRequest {
            title: None,
            ..request()
        })
        .unwrap_err();
        assert_eq!(err.message, "Missing required fields: title");
    }
}
