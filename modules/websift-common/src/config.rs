use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream webset provider credential.
    pub exa_api_key: String,

    /// Gemini credential for the dedup adjudicator. Empty = fail-open mode.
    pub google_api_key: String,

    /// Master switch for the dedup engine. When false, items stream through.
    pub enable_dedup: bool,

    /// HEAD-based URL canonicalization for suspicious company pairs.
    pub enable_url_resolution: bool,

    /// Base URL of the vector-similarity service. None = recall disabled.
    pub vector_url: Option<String>,

    /// Postgres connection string.
    pub database_url: String,

    // Web server
    pub host: String,
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            exa_api_key: required_env("EXA_API_KEY"),
            google_api_key: env::var("GOOGLE_API_KEY").unwrap_or_default(),
            enable_dedup: env_flag("ENABLE_DEDUP", true),
            enable_url_resolution: env_flag("ENABLE_URL_RESOLUTION", false),
            vector_url: env::var("VECTOR_URL").ok().filter(|v| !v.is_empty()),
            database_url: required_env("DATABASE_URL"),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3015".to_string())
                .parse()
                .expect("PORT must be a number"),
        }
    }

    /// Log which credentials are present without leaking their values.
    pub fn log_redacted(&self) {
        let vars = [
            ("EXA_API_KEY", &self.exa_api_key),
            ("GOOGLE_API_KEY", &self.google_api_key),
            ("DATABASE_URL", &self.database_url),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
        tracing::info!(
            enable_dedup = self.enable_dedup,
            enable_url_resolution = self.enable_url_resolution,
            vector_url = ?self.vector_url,
            "feature flags"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_flag_defaults_when_unset() {
        assert!(env_flag("WEBSIFT_TEST_FLAG_UNSET", true));
        assert!(!env_flag("WEBSIFT_TEST_FLAG_UNSET", false));
    }
}
