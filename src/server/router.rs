use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Json, Router, routing::get};
use chrono::Utc;
use serde_json::{Value, json};

use super::attendance::attendance_router;
use super::auth::auth_router;
use super::calendar::calendar_router;
use super::classes::classes_router;
use super::community::community_router;
use super::institutions::institutions_router;
use super::people::people_router;
use crate::config::{AuthMode, ServerConfig};
use crate::error::{Error, Result};
use crate::photos::{PhotoBackup, PhotoStore};
use crate::store::Store;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: ServerConfig,
    pub photos: PhotoStore,
    /// Best-effort photo mirror, invoked after a person is committed.
    pub backup: Option<Arc<dyn PhotoBackup>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        config: ServerConfig,
        backup: Option<Arc<dyn PhotoBackup>>,
    ) -> Self {
        let photos = PhotoStore::new(&config.uploads_dir());
        Self {
            store,
            config,
            photos,
            backup,
        }
    }

    #[must_use]
    pub fn auth_mode(&self) -> AuthMode {
        self.config.auth_mode
    }

    /// Runs `f` against the store on the blocking pool.
    pub async fn db<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Store) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| Error::Internal(format!("store task failed: {e}")))?
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn banner() -> Json<Value> {
    Json(json!({
        "name": "schoolyard",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/", get(banner))
        .nest("/auth", auth_router())
        .nest("/attendance", attendance_router())
        .nest("/calendar", calendar_router())
        .merge(institutions_router())
        .merge(people_router())
        .merge(classes_router())
        .merge(community_router());

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::store::SqliteStore;

    fn router(auth_mode: AuthMode) -> (TempDir, Router) {
        let temp = TempDir::new().unwrap();
        let config = ServerConfig {
            data_dir: temp.path().to_path_buf(),
            auth_mode,
            ..ServerConfig::default()
        };
        let store = SqliteStore::new(config.db_path()).unwrap();
        store.initialize().unwrap();
        let state = Arc::new(AppState::new(Arc::new(store), config, None));
        (temp, create_router(state))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_temp, app) = router(AuthMode::Strict);
        let resp = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_banner_is_served_at_api_root() {
        let (_temp, app) = router(AuthMode::Strict);
        let resp = app.oneshot(get("/api")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let banner: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(banner["name"], "schoolyard");
    }

    #[tokio::test]
    async fn test_strict_mode_challenges_anonymous_reads() {
        let (_temp, app) = router(AuthMode::Strict);
        let resp = app.oneshot(get("/api/attendance")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn test_demo_mode_serves_guest_reads() {
        let (_temp, app) = router(AuthMode::Demo);
        let resp = app.oneshot(get("/api/attendance")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let envelope: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["data"], json!([]));
        assert!(envelope["error"].is_null());
    }

    #[tokio::test]
    async fn test_public_feed_needs_no_token() {
        let (_temp, app) = router(AuthMode::Strict);
        let resp = app.oneshot(get("/api/attendance/public")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
