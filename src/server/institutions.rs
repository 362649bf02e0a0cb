use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;

use crate::auth::{Caller, hash_password};
use crate::error::{Error, Result};
use crate::server::AppState;
use crate::server::dto::{CreateInstitutionRequest, MessageResponse, UpdateInstitutionRequest};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::server::validation::{
    institution_code, institution_folder_name, non_blank, require_fields,
};
use crate::store::Store;
use crate::types::{
    InstitutionDetail, InstitutionStats, InstitutionUpdate, NewInstitution, NewUser, Role,
};

const CODE_ATTEMPTS: usize = 10;

pub fn institutions_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/institutions",
            get(list_institutions).post(create_institution),
        )
        .route(
            "/institutions/{id}",
            get(get_institution)
                .put(update_institution)
                .delete(delete_institution),
        )
        .route("/superadmin/stats", get(system_stats))
        .route("/institution/stats", get(institution_stats))
}

async fn create_institution(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateInstitutionRequest>,
) -> impl IntoResponse {
    caller.require(state.auth_mode())?.require_superadmin()?;

    require_fields(&[
        ("name", req.name.as_deref()),
        ("adminUsername", req.admin_username.as_deref()),
        ("adminPassword", req.admin_password.as_deref()),
        ("adminName", req.admin_name.as_deref()),
    ])?;

    let name = req.name.unwrap_or_default().trim().to_string();
    let admin_username = req.admin_username.unwrap_or_default().trim().to_string();
    let admin_password = req.admin_password.unwrap_or_default();
    let admin_name = req.admin_name.unwrap_or_default().trim().to_string();
    let admin_email = non_blank(req.admin_email);

    let institution = NewInstitution {
        name,
        reg_number: non_blank(req.reg_number),
        institution_type: non_blank(req.institution_type),
        address: req.address,
        email: non_blank(req.email),
        website: non_blank(req.website),
        phone: non_blank(req.phone),
        institution_code: String::new(),
        folder_name: String::new(),
    };

    let detail = state
        .db(move |store| {
            if store.username_exists(&admin_username)? {
                return Err(Error::Conflict("username".into()));
            }

            let mut institution = institution;
            institution.institution_code = unique_code(store, &institution.name)?;
            institution.folder_name =
                institution_folder_name(&institution.name, &institution.institution_code);

            let admin = NewUser {
                username: admin_username,
                password_hash: hash_password(&admin_password)?,
                role: Role::Admin,
                name: admin_name,
                email: admin_email,
                institution_id: None,
            };
            let created = store.create_institution_with_admin(&institution, &admin)?;

            Ok(InstitutionDetail {
                institution: created,
                admin_username: Some(admin.username),
                admin_name: Some(admin.name),
                admin_email: admin.email,
            })
        })
        .await
        .api_err("Failed to create institution")?;

    if let Err(e) = state
        .photos
        .ensure_institution_dirs(&detail.institution.folder_name)
        .await
    {
        tracing::warn!(
            "Failed to create upload folders for {}: {e}",
            detail.institution.folder_name
        );
    }

    tracing::info!(
        "Created institution {} ({})",
        detail.institution.name,
        detail.institution.institution_code
    );

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(detail))))
}

fn unique_code(store: &dyn Store, name: &str) -> Result<String> {
    for _ in 0..CODE_ATTEMPTS {
        let code = institution_code(name);
        if !store.institution_code_exists(&code)? {
            return Ok(code);
        }
    }
    Err(Error::Conflict("institution code".into()))
}

async fn list_institutions(caller: Caller, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    caller.require(state.auth_mode())?.require_superadmin()?;

    let institutions = state
        .db(|store| store.list_institutions())
        .await
        .api_err("Failed to list institutions")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(institutions)))
}

async fn get_institution(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    caller.require(state.auth_mode())?.require_superadmin()?;

    let detail = state
        .db(move |store| store.get_institution_detail(id))
        .await
        .api_err("Failed to get institution")?
        .or_not_found("Institution not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(detail)))
}

async fn update_institution(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateInstitutionRequest>,
) -> impl IntoResponse {
    caller.require(state.auth_mode())?.require_superadmin()?;

    require_fields(&[
        ("name", req.name.as_deref()),
        ("regNumber", req.reg_number.as_deref()),
        ("type", req.institution_type.as_deref()),
        ("email", req.email.as_deref()),
        ("adminEmail", req.admin_email.as_deref()),
    ])?;

    let update = InstitutionUpdate {
        name: req.name.unwrap_or_default().trim().to_string(),
        reg_number: req.reg_number.unwrap_or_default().trim().to_string(),
        institution_type: req.institution_type.unwrap_or_default().trim().to_string(),
        address: req.address,
        email: req.email.unwrap_or_default().trim().to_string(),
        website: non_blank(req.website),
        phone: non_blank(req.phone),
        admin_email: req.admin_email.unwrap_or_default().trim().to_string(),
    };

    let detail = state
        .db(move |store| {
            if !store.update_institution(id, &update)? {
                return Ok(None);
            }
            store.get_institution_detail(id)
        })
        .await
        .api_err("Failed to update institution")?
        .or_not_found("Institution not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(detail)))
}

async fn delete_institution(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    caller.require(state.auth_mode())?.require_superadmin()?;

    let deleted = state
        .db(move |store| store.delete_institution(id))
        .await
        .api_err("Failed to delete institution")?;
    if !deleted {
        return Err(ApiError::not_found("Institution not found"));
    }

    tracing::info!("Deleted institution {id}");

    Ok::<_, ApiError>(Json(ApiResponse::success(MessageResponse::new(
        "Institution deleted successfully",
    ))))
}

async fn system_stats(caller: Caller, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    caller.require(state.auth_mode())?.require_superadmin()?;

    let stats = state
        .db(|store| store.system_stats())
        .await
        .api_err("Failed to get system statistics")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(stats)))
}

/// Dashboard figures for the caller's own institution. Callers that do not
/// administer an institution get zeros.
async fn institution_stats(caller: Caller, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;

    let stats = match (identity.role, identity.institution_id) {
        (Role::Admin, Some(institution_id)) => {
            let today = Utc::now().date_naive();
            state
                .db(move |store| store.institution_stats(institution_id, today))
                .await
                .api_err("Failed to get institution statistics")?
        }
        _ => InstitutionStats::default(),
    };

    Ok::<_, ApiError>(Json(ApiResponse::success(stats)))
}
