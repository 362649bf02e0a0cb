use crate::cli::ApiClient;
use crate::error::{Error, Result};
use crate::types::AttendanceRecord;

use super::poller::FeedSource;

/// Reads the public attendance feed of a running server.
pub struct HttpFeedSource {
    client: ApiClient,
    limit: usize,
    institution_code: Option<String>,
}

impl HttpFeedSource {
    pub fn new(client: ApiClient, limit: usize, institution_code: Option<String>) -> Self {
        Self {
            client,
            limit,
            institution_code,
        }
    }
}

fn remote(e: anyhow::Error) -> Error {
    Error::Internal(format!("{e:#}"))
}

impl FeedSource for HttpFeedSource {
    async fn probe(&self) -> Result<()> {
        self.client.health().await.map_err(remote)
    }

    async fn fetch(&self) -> Result<Vec<AttendanceRecord>> {
        self.client
            .public_attendance(self.limit, self.institution_code.as_deref())
            .await
            .map_err(remote)
    }
}
