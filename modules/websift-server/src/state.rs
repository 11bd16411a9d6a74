//! Shared server state and the in-memory job registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use ai_client::{Gemini, JsonCompleter};
use exa_client::ExaClient;
use vector_client::VectorClient;
use websift_common::Config;
use websift_dedup::{DedupEngine, UrlResolver, VectorIndex};
use websift_store::PgStore;

use crate::bus::JobBus;

/// Live state of one job: its broadcast bus and dedup engine. Contexts stay
/// registered after completion so late subscribers can still replay.
pub struct JobContext {
    pub job_id: String,
    pub bus: Arc<JobBus>,
    pub engine: DedupEngine,
}

pub struct AppState {
    pub config: Config,
    pub exa: ExaClient,
    pub store: Arc<PgStore>,
    pub vector: Option<Arc<dyn VectorIndex>>,
    pub llm: Option<Arc<dyn JsonCompleter>>,
    /// Process-wide single-flight gate for LLM requests.
    pub llm_gate: Arc<Semaphore>,
    /// Global HEAD-resolution cache, shared across jobs.
    pub resolver: Option<Arc<UrlResolver>>,
    jobs: Mutex<HashMap<String, Arc<JobContext>>>,
}

impl AppState {
    pub async fn build(config: Config) -> Result<Arc<Self>> {
        let exa = ExaClient::new(config.exa_api_key.clone());

        let vector: Option<Arc<dyn VectorIndex>> = match &config.vector_url {
            Some(url) => {
                let client = VectorClient::new(url);
                match client.health().await {
                    Ok(health) => info!(
                        status = %health.status,
                        index_size = health.index_size,
                        "Vector service reachable"
                    ),
                    Err(e) => warn!(error = %e, "Vector service unreachable; recall degraded"),
                }
                Some(Arc::new(client))
            }
            None => {
                info!("VECTOR_URL not set; vector recall disabled");
                None
            }
        };

        let llm: Option<Arc<dyn JsonCompleter>> = if !config.enable_dedup {
            None
        } else if config.google_api_key.is_empty() {
            warn!("GOOGLE_API_KEY not set; LLM adjudication runs fail-open");
            None
        } else {
            Some(Arc::new(Gemini::new(&config.google_api_key)))
        };

        let resolver = config
            .enable_url_resolution
            .then(|| Arc::new(UrlResolver::new()));

        let store = Arc::new(
            PgStore::connect(&config.database_url)
                .await
                .context("Failed to connect to Postgres")?,
        );
        store
            .migrate()
            .await
            .context("Failed to run migrations")?;

        Ok(Arc::new(Self {
            config,
            exa,
            store,
            vector,
            llm,
            llm_gate: Arc::new(Semaphore::new(1)),
            resolver,
            jobs: Mutex::new(HashMap::new()),
        }))
    }

    pub fn register_job(&self, context: Arc<JobContext>) {
        self.jobs
            .lock()
            .expect("job registry lock poisoned")
            .insert(context.job_id.clone(), context);
    }

    pub fn job(&self, job_id: &str) -> Option<Arc<JobContext>> {
        self.jobs
            .lock()
            .expect("job registry lock poisoned")
            .get(job_id)
            .cloned()
    }
}
