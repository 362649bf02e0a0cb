use std::path::Path;
use std::sync::Arc;

use reqwest::Client;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::oneshot;

use schoolyard::cli::{open_store, run_init};
use schoolyard::config::{AuthMode, ServerConfig};
use schoolyard::server::{AppState, create_router};

/// A router served in-process on an ephemeral port.
pub struct TestServer {
    pub temp_dir: TempDir,
    pub base_url: String,
    pub superadmin_password: String,
    pub client: Client,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(AuthMode::Strict).await
    }

    pub async fn start_with(auth_mode: AuthMode) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let config = ServerConfig {
            data_dir: temp_dir.path().join("data"),
            auth_mode,
            ..ServerConfig::default()
        };

        let outcome = run_init(&config, "superadmin").expect("init data dir");
        let store = open_store(&config).expect("open store");
        let state = Arc::new(AppState::new(Arc::new(store), config, None));
        let app = create_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .expect("serve");
        });

        Self {
            temp_dir,
            base_url: format!("http://{addr}"),
            superadmin_password: outcome.password,
            client: Client::new(),
            shutdown: Some(tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub async fn login(&self, username: &str, password: &str) -> String {
        let resp: Value = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&json!({"username": username, "password": password}))
            .send()
            .await
            .expect("login")
            .json()
            .await
            .expect("parse login response");
        resp["data"]["token"]
            .as_str()
            .unwrap_or_else(|| panic!("login failed for {username}: {resp}"))
            .to_string()
    }

    pub async fn superadmin_token(&self) -> String {
        self.login("superadmin", &self.superadmin_password).await
    }

    /// Creates an institution with admin `<admin>`/`secret-<admin>` and
    /// returns `(institution id, institution code)`.
    pub async fn create_institution(&self, token: &str, name: &str, admin: &str) -> (i64, String) {
        let resp = self
            .client
            .post(self.url("/api/institutions"))
            .bearer_auth(token)
            .json(&json!({
                "name": name,
                "type": "secondary",
                "adminUsername": admin,
                "adminPassword": format!("secret-{admin}"),
                "adminName": format!("{name} Admin"),
            }))
            .send()
            .await
            .expect("create institution");
        assert_eq!(resp.status(), 201, "create institution {name}");

        let body: Value = resp.json().await.expect("parse institution");
        (
            body["data"]["id"].as_i64().expect("institution id"),
            body["data"]["institution_code"]
                .as_str()
                .expect("institution code")
                .to_string(),
        )
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
