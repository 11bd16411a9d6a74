use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Dedup mode ---

/// Which dedup discipline a job runs under. Company jobs fingerprint on
/// domain identity; entity jobs (movies, books, shows, ...) are name-centric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    Company,
    Entity,
}

impl DedupMode {
    /// Entity type strings other than "company" select entity mode.
    pub fn from_entity(entity_type: Option<&str>) -> Self {
        match entity_type {
            Some(e) if !e.is_empty() && e != "company" => DedupMode::Entity,
            _ => DedupMode::Company,
        }
    }
}

// --- Job ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Active,
    Processing,
    ProcessingItems,
    Completed,
    Error,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Active => write!(f, "active"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::ProcessingItems => write!(f, "processing_items"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// One ingestion job and its persisted counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub original_query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    pub status: JobStatus,
    pub total_items: i64,
    pub unique_items: i64,
    pub duplicates_rejected: i64,
    #[serde(default)]
    pub rejection_reasons: HashMap<String, i64>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

// --- Items ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Accepted,
    Rejected,
    Pending,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Accepted => write!(f, "accepted"),
            ItemStatus::Rejected => write!(f, "rejected"),
            ItemStatus::Pending => write!(f, "pending"),
        }
    }
}

/// Persisted per-item record with the full rejection taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub job_id: String,
    pub item_id: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<serde_json::Value>,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    pub created_at: DateTime<Utc>,
}

// --- Rejection reasons ---

/// Fixed rejection-reason taxonomy. The string forms appear both in stream
/// frames and in persisted counters, so additions here are append-only and
/// renames are forbidden. Historical reasons read back from the database are
/// kept as plain strings by the history API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    ExactMatch,
    /// Legacy catch-all from before the rule split.
    FuzzyMatch,
    CacheHit,
    LlmDuplicate,
    NearDuplicate,
    UrlNearDuplicate,
    SubdomainDuplicate,
    UrlResolutionDuplicate,
    ExactUrlDuplicate,
    NormalizedTitleDuplicate,
    EntityFuzzyMatch,
    EntityVeryHighSimilarity,
    EntityLlmDuplicate,
    HighSimilarityMatch,
    /// Internal marker for staged company decisions; not emitted to streams.
    CompanyDecision,
    ExactNameDuplicate,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::ExactMatch => "exact_match",
            RejectionReason::FuzzyMatch => "fuzzy_match",
            RejectionReason::CacheHit => "cache_hit",
            RejectionReason::LlmDuplicate => "llm_duplicate",
            RejectionReason::NearDuplicate => "near_duplicate",
            RejectionReason::UrlNearDuplicate => "url_near_duplicate",
            RejectionReason::SubdomainDuplicate => "subdomain_duplicate",
            RejectionReason::UrlResolutionDuplicate => "url_resolution_duplicate",
            RejectionReason::ExactUrlDuplicate => "exact_url_duplicate",
            RejectionReason::NormalizedTitleDuplicate => "normalized_title_duplicate",
            RejectionReason::EntityFuzzyMatch => "entity_fuzzy_match",
            RejectionReason::EntityVeryHighSimilarity => "entity_very_high_similarity",
            RejectionReason::EntityLlmDuplicate => "entity_llm_duplicate",
            RejectionReason::HighSimilarityMatch => "high_similarity_match",
            RejectionReason::CompanyDecision => "company_decision",
            RejectionReason::ExactNameDuplicate => "exact_name_duplicate",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_serializes_to_taxonomy_string() {
        let json = serde_json::to_string(&RejectionReason::ExactMatch).unwrap();
        assert_eq!(json, "\"exact_match\"");
        assert_eq!(RejectionReason::EntityLlmDuplicate.to_string(), "entity_llm_duplicate");
    }

    #[test]
    fn mode_from_entity() {
        assert_eq!(DedupMode::from_entity(None), DedupMode::Company);
        assert_eq!(DedupMode::from_entity(Some("company")), DedupMode::Company);
        assert_eq!(DedupMode::from_entity(Some("movie")), DedupMode::Entity);
        assert_eq!(DedupMode::from_entity(Some("")), DedupMode::Company);
    }

    #[test]
    fn job_status_roundtrip() {
        let s = serde_json::to_string(&JobStatus::ProcessingItems).unwrap();
        assert_eq!(s, "\"processing_items\"");
        let back: JobStatus = serde_json::from_str(&s).unwrap();
        assert_eq!(back, JobStatus::ProcessingItems);
    }
}
