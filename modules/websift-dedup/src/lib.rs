//! Multi-tier stream deduplication: deterministic fingerprinting, fuzzy
//! similarity, vector recall, and batched LLM adjudication, per job.

pub mod adjudicator;
pub mod candidates;
pub mod canonical;
pub mod engine;
pub mod fingerprint;
pub mod fuzzy;
pub mod pending;
pub mod traits;
pub mod url_resolve;

pub use adjudicator::{Adjudicator, LLM_BATCH, LLM_LAT_MS};
pub use canonical::{canonicalize, normalized_title, CanonicalRow};
pub use engine::{DedupEngine, EngineDeps};
pub use pending::PendingDecision;
pub use traits::{CounterBump, DedupSink, ItemWriter, VectorIndex};
pub use url_resolve::{ResolverStats, UrlResolver};
