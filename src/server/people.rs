use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use crate::auth::{Caller, Identity, hash_password};
use crate::error::{Error, Result};
use crate::photos::{
    BackupJob, DEFAULT_FOLDER, MAX_PHOTO_BYTES, MAX_PHOTOS, PersonKind, PhotoStore,
    person_dir_name, spawn_backup,
};
use crate::server::AppState;
use crate::server::dto::{ListParams, MessageResponse};
use crate::server::multipart::{PersonForm, read_person_form};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::server::validation::{non_blank, require_fields};
use crate::store::{PersonFilter, Store};
use crate::types::{NewStudent, NewTeacher, NewUser, PhotoInfo, Role};

const DEFAULT_STATUS: &str = "active";
/// Full photo allowance plus 1 MiB for text fields and multipart framing.
const PERSON_FORM_LIMIT: usize = MAX_PHOTOS * MAX_PHOTO_BYTES + 1024 * 1024;

pub fn people_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/students", get(list_students).post(create_student))
        .route("/students/{id}", get(get_student).delete(delete_student))
        .route("/students/{id}/photos", get(student_photos))
        .route("/teachers", get(list_teachers).post(create_teacher))
        .route("/teachers/{id}", get(get_teacher).delete(delete_teacher))
        .route("/teachers/{id}/photos", get(teacher_photos))
        .layer(DefaultBodyLimit::max(PERSON_FORM_LIMIT))
}

fn person_filter(params: ListParams) -> PersonFilter {
    PersonFilter {
        department: non_blank(params.department),
        status: Some(non_blank(params.status).unwrap_or_else(|| DEFAULT_STATUS.to_string())),
    }
}

/// Fields shared by the student and teacher forms.
struct PersonFields {
    id: String,
    name: String,
    department: String,
    username: String,
    password: String,
    email: Option<String>,
    phone: Option<String>,
    status: String,
}

impl PersonFields {
    fn from_form(form: &PersonForm) -> std::result::Result<Self, ApiError> {
        let id = form.text("id");
        let name = form.text("name");
        let department = form.text("department");
        let username = form.text("username");
        let password = form.text("password");
        require_fields(&[
            ("id", id.as_deref()),
            ("name", name.as_deref()),
            ("department", department.as_deref()),
            ("username", username.as_deref()),
            ("password", password.as_deref()),
        ])?;

        Ok(Self {
            id: id.unwrap_or_default(),
            name: name.unwrap_or_default(),
            department: department.unwrap_or_default(),
            username: username.unwrap_or_default(),
            password: password.unwrap_or_default(),
            email: form.text("email"),
            phone: form.text("phone"),
            status: form.text("status").unwrap_or_else(|| DEFAULT_STATUS.to_string()),
        })
    }

    fn account(&self, role: Role, institution_id: Option<i64>) -> Result<NewUser> {
        Ok(NewUser {
            username: self.username.clone(),
            password_hash: hash_password(&self.password)?,
            role,
            name: self.name.clone(),
            email: self.email.clone(),
            institution_id,
        })
    }
}

/// Rejects duplicate ids and usernames and resolves the caller's upload folder.
fn precheck(
    store: &dyn Store,
    kind: PersonKind,
    id: &str,
    username: &str,
    institution_id: Option<i64>,
) -> Result<Option<String>> {
    let id_taken = match kind {
        PersonKind::Student => store.student_exists(id)?,
        PersonKind::Teacher => store.teacher_exists(id)?,
    };
    if id_taken {
        return Err(Error::Conflict(format!("{} id", role_label(kind))));
    }
    if store.username_exists(username)? {
        return Err(Error::Conflict("username".into()));
    }

    match institution_id {
        Some(id) => Ok(store.get_institution(id)?.map(|i| i.folder_name)),
        None => Ok(None),
    }
}

fn role_label(kind: PersonKind) -> &'static str {
    match kind {
        PersonKind::Student => "student",
        PersonKind::Teacher => "teacher",
    }
}

/// Writes the form's photos before the record exists so a disk failure is
/// reported to the caller. Returns the saved files.
async fn save_photos(
    state: &AppState,
    relative: &str,
    form: &PersonForm,
) -> std::result::Result<Vec<PathBuf>, ApiError> {
    if form.photos.is_empty() {
        return Ok(Vec::new());
    }
    state.photos.save(relative, &form.photos).await.map_err(|e| {
        tracing::error!("Failed to save photos under {relative}: {e}");
        ApiError::internal("Failed to save photos")
    })
}

/// Removes files written for a record whose insert failed.
async fn discard_photos(files: &[PathBuf]) {
    for file in files {
        if let Err(e) = tokio::fs::remove_file(file).await {
            tracing::warn!("Failed to discard photo {}: {e}", file.display());
        }
    }
}

fn schedule_backup(
    state: &AppState,
    folder: Option<&str>,
    kind: PersonKind,
    name: &str,
    id: &str,
    files: Vec<PathBuf>,
) {
    let Some(backup) = &state.backup else {
        return;
    };
    if files.is_empty() {
        return;
    }
    let job = BackupJob {
        institution_folder: folder.unwrap_or(DEFAULT_FOLDER).to_string(),
        person_dir: format!("{}/{}", kind.dir_name(), person_dir_name(name, id, kind)),
        files,
    };
    spawn_backup(Arc::clone(backup), job);
}

async fn list_photos(
    state: &AppState,
    photo_directory: Option<&str>,
) -> std::result::Result<Vec<PhotoInfo>, ApiError> {
    let Some(dir) = photo_directory else {
        return Ok(Vec::new());
    };
    state.photos.list(dir).await.map_err(|e| {
        tracing::error!("Failed to list photos in {dir}: {e}");
        ApiError::internal("Failed to list photos")
    })
}

async fn remove_photo_dir(state: &AppState, photo_directory: Option<&str>) {
    let Some(dir) = photo_directory else {
        return;
    };
    if let Err(e) = state.photos.remove(dir).await {
        tracing::warn!("Failed to remove photo directory {dir}: {e}");
    }
}

fn require_visible(
    identity: &Identity,
    institution_id: Option<i64>,
    what: &'static str,
) -> std::result::Result<(), ApiError> {
    if identity.scope().permits(institution_id) {
        Ok(())
    } else {
        Err(ApiError::not_found(what))
    }
}

// Students

async fn list_students(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    let filter = person_filter(params);
    let scope = identity.scope();

    let students = state
        .db(move |store| store.list_students(&filter, &scope))
        .await
        .api_err("Failed to list students")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(students)))
}

async fn get_student(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;

    let student = state
        .db(move |store| store.get_student(&id))
        .await
        .api_err("Failed to get student")?
        .or_not_found("Student not found")?;
    require_visible(&identity, student.institution_id, "Student not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(student)))
}

async fn student_photos(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;

    let student = state
        .db(move |store| store.get_student(&id))
        .await
        .api_err("Failed to get student")?
        .or_not_found("Student not found")?;
    require_visible(&identity, student.institution_id, "Student not found")?;

    let photos = list_photos(&state, student.photo_directory.as_deref()).await?;
    Ok::<_, ApiError>(Json(ApiResponse::success(photos)))
}

async fn create_student(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    identity.require_manager()?;

    let form = read_person_form(multipart).await?;
    let fields = PersonFields::from_form(&form)?;
    let institution_id = identity.institution_id;

    let (id, username) = (fields.id.clone(), fields.username.clone());
    let folder = state
        .db(move |store| precheck(store, PersonKind::Student, &id, &username, institution_id))
        .await
        .api_err("Failed to create student")?;

    let relative = PhotoStore::relative_dir(
        folder.as_deref(),
        PersonKind::Student,
        &fields.name,
        &fields.id,
    );
    let saved = save_photos(&state, &relative, &form).await?;

    let student = NewStudent {
        id: fields.id.clone(),
        name: fields.name.clone(),
        department: fields.department.clone(),
        class_label: form.text("class"),
        email: fields.email.clone(),
        phone: fields.phone.clone(),
        status: fields.status.clone(),
        institution_id,
        photo_directory: Some(relative),
    };

    let created = state
        .db(move |store| {
            let account = fields.account(Role::Student, institution_id)?;
            store.create_student(&student, &account)
        })
        .await;
    let created = match created {
        Ok(student) => student,
        Err(e) => {
            discard_photos(&saved).await;
            return Err(ApiError::from_store(e, "Failed to create student"));
        }
    };

    tracing::info!("Created student {} ({})", created.id, created.name);
    schedule_backup(
        &state,
        folder.as_deref(),
        PersonKind::Student,
        &created.name,
        &created.id,
        saved,
    );

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

async fn delete_student(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    identity.require_manager()?;

    let lookup = id.clone();
    let student = state
        .db(move |store| store.get_student(&lookup))
        .await
        .api_err("Failed to get student")?
        .or_not_found("Student not found")?;
    if !identity.scope().permits(student.institution_id) {
        return Err(ApiError::forbidden("You can only delete students from your institution"));
    }

    let deleted = state
        .db(move |store| store.delete_student(&id))
        .await
        .api_err("Failed to delete student")?
        .or_not_found("Student not found")?;

    remove_photo_dir(&state, deleted.photo_directory.as_deref()).await;
    tracing::info!("Deleted student {}", deleted.id);

    Ok::<_, ApiError>(Json(ApiResponse::success(MessageResponse::new(
        "Student deleted successfully",
    ))))
}

// Teachers

async fn list_teachers(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    let filter = person_filter(params);
    let scope = identity.scope();

    let teachers = state
        .db(move |store| store.list_teachers(&filter, &scope))
        .await
        .api_err("Failed to list teachers")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(teachers)))
}

async fn get_teacher(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;

    let teacher = state
        .db(move |store| store.get_teacher(&id))
        .await
        .api_err("Failed to get teacher")?
        .or_not_found("Teacher not found")?;
    require_visible(&identity, teacher.institution_id, "Teacher not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(teacher)))
}

async fn teacher_photos(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;

    let teacher = state
        .db(move |store| store.get_teacher(&id))
        .await
        .api_err("Failed to get teacher")?
        .or_not_found("Teacher not found")?;
    require_visible(&identity, teacher.institution_id, "Teacher not found")?;

    let photos = list_photos(&state, teacher.photo_directory.as_deref()).await?;
    Ok::<_, ApiError>(Json(ApiResponse::success(photos)))
}

async fn create_teacher(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    identity.require_manager()?;

    let form = read_person_form(multipart).await?;
    let fields = PersonFields::from_form(&form)?;
    let experience = form
        .text("experience")
        .map(|v| v.parse::<i64>())
        .transpose()
        .map_err(|_| ApiError::bad_request("experience must be a whole number of years"))?;
    let institution_id = identity.institution_id;

    let (id, username) = (fields.id.clone(), fields.username.clone());
    let folder = state
        .db(move |store| precheck(store, PersonKind::Teacher, &id, &username, institution_id))
        .await
        .api_err("Failed to create teacher")?;

    let relative = PhotoStore::relative_dir(
        folder.as_deref(),
        PersonKind::Teacher,
        &fields.name,
        &fields.id,
    );
    let saved = save_photos(&state, &relative, &form).await?;

    let teacher = NewTeacher {
        id: fields.id.clone(),
        name: fields.name.clone(),
        department: fields.department.clone(),
        subject: form.text("subject"),
        email: fields.email.clone(),
        phone: fields.phone.clone(),
        qualification: form.text("qualification"),
        experience,
        status: fields.status.clone(),
        institution_id,
        photo_directory: Some(relative),
    };

    let created = state
        .db(move |store| {
            let account = fields.account(Role::Teacher, institution_id)?;
            store.create_teacher(&teacher, &account)
        })
        .await;
    let created = match created {
        Ok(teacher) => teacher,
        Err(e) => {
            discard_photos(&saved).await;
            return Err(ApiError::from_store(e, "Failed to create teacher"));
        }
    };

    tracing::info!("Created teacher {} ({})", created.id, created.name);
    schedule_backup(
        &state,
        folder.as_deref(),
        PersonKind::Teacher,
        &created.name,
        &created.id,
        saved,
    );

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

async fn delete_teacher(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let identity = caller.require(state.auth_mode())?;
    identity.require_manager()?;

    let lookup = id.clone();
    let teacher = state
        .db(move |store| store.get_teacher(&lookup))
        .await
        .api_err("Failed to get teacher")?
        .or_not_found("Teacher not found")?;
    if !identity.scope().permits(teacher.institution_id) {
        return Err(ApiError::forbidden("You can only delete teachers from your institution"));
    }

    let deleted = state
        .db(move |store| store.delete_teacher(&id))
        .await
        .api_err("Failed to delete teacher")?
        .or_not_found("Teacher not found")?;

    remove_photo_dir(&state, deleted.photo_directory.as_deref()).await;
    tracing::info!("Deleted teacher {}", deleted.id);

    Ok::<_, ApiError>(Json(ApiResponse::success(MessageResponse::new(
        "Teacher deleted successfully",
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_person_filter_defaults_to_active() {
        let filter = person_filter(ListParams::default());
        assert_eq!(filter.status.as_deref(), Some("active"));
        assert_eq!(filter.department, None);

        let filter = person_filter(ListParams {
            department: Some(" CSE ".into()),
            status: Some("inactive".into()),
        });
        assert_eq!(filter.department.as_deref(), Some("CSE"));
        assert_eq!(filter.status.as_deref(), Some("inactive"));
    }
}
