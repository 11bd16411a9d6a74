pub mod error;
pub mod types;

pub use error::{ExaError, Result};
pub use types::{
    item_id, CreateWebsetRequest, ItemPage, Webset, WebsetEnrichment, WebsetEntity, WebsetSearch,
};

const BASE_URL: &str = "https://api.exa.ai/websets/v0";

pub struct ExaClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ExaClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Create a webset and kick off the upstream search. Returns immediately
    /// with webset metadata; items arrive asynchronously.
    pub async fn create_webset(&self, request: &CreateWebsetRequest) -> Result<Webset> {
        let url = format!("{}/websets", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExaError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let webset: Webset = resp.json().await?;
        tracing::info!(webset_id = %webset.id, status = %webset.status, "Webset created");
        Ok(webset)
    }

    /// Fetch current webset status.
    pub async fn get_webset(&self, webset_id: &str) -> Result<Webset> {
        let url = format!("{}/websets/{}", self.base_url, webset_id);
        let resp = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExaError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(resp.json().await?)
    }

    /// Fetch one page of webset items. `cursor` of None starts from the
    /// beginning; pass the returned `next_cursor` to continue.
    pub async fn list_items(
        &self,
        webset_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<ItemPage> {
        let url = format!("{}/websets/{}/items", self.base_url, webset_id);
        let mut req = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .query(&[("limit", limit.to_string())]);
        if let Some(cursor) = cursor {
            req = req.query(&[("cursor", cursor)]);
        }

        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExaError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let page: ItemPage = resp.json().await?;
        tracing::debug!(
            webset_id,
            items = page.data.len(),
            has_more = page.has_more,
            "Fetched webset item page"
        );
        Ok(page)
    }
}
