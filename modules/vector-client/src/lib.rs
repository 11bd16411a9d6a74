pub mod error;

pub use error::{Result, VectorError};

use std::time::Duration;

use serde::Deserialize;

/// Response of POST /add. The service reports `ok: false` with an error
/// string for rejected input; an already-indexed id is not a failure.
#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Response of POST /query. Distances are parallel to ids when present.
#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    distances: Vec<f64>,
}

/// Response of GET /health.
#[derive(Debug, Clone, Deserialize)]
pub struct VectorHealth {
    pub status: String,
    #[serde(default)]
    pub index_size: u64,
}

pub struct VectorClient {
    client: reqwest::Client,
    base_url: String,
}

impl VectorClient {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Index a text under a row id.
    pub async fn add(&self, row_id: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({ "row_id": row_id, "text": text });
        let resp = self
            .client
            .post(format!("{}/add", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(VectorError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let add: AddResponse = resp
            .json()
            .await
            .map_err(|e| VectorError::Parse(e.to_string()))?;
        if !add.ok {
            let error = add.error.unwrap_or_default();
            // Re-adding a known id is the common case during retries.
            if error.contains("already exists") {
                tracing::debug!(row_id, "Vector id already indexed");
                return Ok(());
            }
            return Err(VectorError::Api {
                status: 200,
                message: error,
            });
        }
        Ok(())
    }

    /// Query the k nearest indexed texts. Returns row ids, best first.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<String>> {
        let body = serde_json::json!({ "text": text, "k": k });
        let resp = self
            .client
            .post(format!("{}/query", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(VectorError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let query: QueryResponse = resp
            .json()
            .await
            .map_err(|e| VectorError::Parse(e.to_string()))?;
        if !query.distances.is_empty() {
            tracing::debug!(hits = query.ids.len(), nearest = ?query.distances.first(), "Vector query");
        }
        Ok(query.ids)
    }

    /// Probe the service. Used at startup to log availability.
    pub async fn health(&self) -> Result<VectorHealth> {
        let resp = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(VectorError::Api {
                status: status.as_u16(),
                message,
            });
        }

        resp.json()
            .await
            .map_err(|e| VectorError::Parse(e.to_string()))
    }
}
