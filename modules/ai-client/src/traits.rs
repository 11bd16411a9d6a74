use anyhow::Result;
use async_trait::async_trait;

/// A model that answers a prompt with a JSON document.
///
/// The returned string is the raw model output; callers own parsing so they
/// can apply their own fail-open policies on malformed JSON.
#[async_trait]
pub trait JsonCompleter: Send + Sync {
    async fn complete_json(&self, system: &str, user: &str) -> Result<String>;
}
