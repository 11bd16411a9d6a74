use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebsiftError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upstream error: {0}")]
    UpstreamTransient(String),

    #[error("Upstream fatal error: {0}")]
    UpstreamFatal(String),

    #[error("Vector service error: {0}")]
    VectorTransient(String),

    #[error("LLM transport error: {0}")]
    LlmTransient(String),

    #[error("LLM parse error: {0}")]
    LlmParse(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
