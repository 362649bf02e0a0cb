use std::time::Duration;

use reqwest::{Client, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::types::AttendanceRecord;

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

/// The `{data, error}` envelope every API route answers with.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub error: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /health`, which answers plain `OK`.
    pub async fn health(&self) -> anyhow::Result<()> {
        let url = format!("{}/health", self.base_url);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("Health check returned {}", resp.status());
        }
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<T> {
        let url = format!("{}/api{}", self.base_url, path);
        let resp = self.client.get(&url).query(query).send().await?;
        Self::handle_response(resp).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> anyhow::Result<T> {
        let url = format!("{}/api{}", self.base_url, path);
        let resp = self.client.post(&url).json(body).send().await?;
        Self::handle_response(resp).await
    }

    /// Latest attendance from the public feed, newest first.
    pub async fn public_attendance(
        &self,
        limit: usize,
        institution_code: Option<&str>,
    ) -> anyhow::Result<Vec<AttendanceRecord>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(code) = institution_code {
            query.push(("institution_code", code.to_string()));
        }
        self.get("/attendance/public", &query).await
    }

    async fn handle_response<T: DeserializeOwned>(resp: Response) -> anyhow::Result<T> {
        let status = resp.status();
        if status.is_success() {
            let api_resp: ApiResponse<T> = resp.json().await?;
            api_resp
                .data
                .ok_or_else(|| anyhow::anyhow!("Server returned an empty response"))
        } else {
            let message = match resp.json::<ApiResponse<()>>().await {
                Ok(api_resp) => api_resp.error,
                Err(_) => None,
            };
            Err(anyhow::anyhow!(message.unwrap_or_else(|| {
                format!("Server error {status} (no details provided)")
            })))
        }
    }
}
