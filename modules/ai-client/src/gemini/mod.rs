mod client;
mod types;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::traits::JsonCompleter;
use client::GeminiClient;
use types::{Content, GenerateRequest, GenerationConfig};

const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Gemini client in JSON-output mode.
pub struct Gemini {
    client: GeminiClient,
    model: String,
    temperature: Option<f32>,
}

impl Gemini {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: GeminiClient::new(api_key),
            model: DEFAULT_MODEL.to_string(),
            temperature: Some(0.0),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.client = self.client.with_base_url(url);
        self
    }

    /// One-shot prompt returning the raw JSON text from the model.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content::user(user)],
            system_instruction: if system.is_empty() {
                None
            } else {
                Some(Content::system(system))
            },
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                temperature: self.temperature,
            },
        };

        let response = self.client.generate(&self.model, &request).await?;
        response
            .text()
            .ok_or_else(|| anyhow!("No response from Gemini"))
    }

    /// Prompt the model and deserialize its JSON answer into T.
    pub async fn extract<T: DeserializeOwned>(&self, system: &str, user: &str) -> Result<T> {
        let text = self.complete(system, user).await?;
        serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse Gemini JSON output: {e}: {text}"))
    }
}

#[async_trait]
impl JsonCompleter for Gemini {
    async fn complete_json(&self, system: &str, user: &str) -> Result<String> {
        self.complete(system, user).await
    }
}
