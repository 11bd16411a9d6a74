//! Item documents and atomic per-job counter updates.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::warn;

use websift_common::{ItemRecord, ItemStatus, RejectionReason};
use websift_dedup::traits::{CounterBump, ItemWriter};

use crate::PgStore;

/// Max retries for counter updates on write conflicts.
const COUNTER_MAX_ATTEMPTS: u32 = 3;
/// Base backoff; actual delay is base * 2^attempt plus 0-50ms jitter.
const COUNTER_RETRY_BASE: Duration = Duration::from_millis(50);

/// Which item subset a history query wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemFilter {
    All,
    Accepted,
    Rejected,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    job_id: String,
    item_id: String,
    name: String,
    url: String,
    properties: Option<serde_json::Value>,
    raw_data: Option<serde_json::Value>,
    status: String,
    rejected_by: Option<String>,
    rejection_reason: Option<String>,
    rejection_details: Option<String>,
    normalized_title: Option<String>,
    similarity: Option<f64>,
    created_at: DateTime<Utc>,
}

impl ItemRow {
    fn into_record(self) -> ItemRecord {
        ItemRecord {
            job_id: self.job_id,
            item_id: self.item_id,
            name: self.name,
            url: self.url,
            properties: self.properties,
            raw_data: self.raw_data,
            status: match self.status.as_str() {
                "accepted" => ItemStatus::Accepted,
                "rejected" => ItemStatus::Rejected,
                _ => ItemStatus::Pending,
            },
            rejected_by: self.rejected_by,
            // Historical reasons are kept verbatim, whatever taxonomy
            // version wrote them.
            rejection_reason: self.rejection_reason,
            rejection_details: self.rejection_details,
            normalized_title: self.normalized_title,
            similarity: self.similarity,
            created_at: self.created_at,
        }
    }
}

impl PgStore {
    pub async fn job_items(&self, job_id: &str, filter: ItemFilter) -> Result<Vec<ItemRecord>> {
        let status = match filter {
            ItemFilter::All => None,
            ItemFilter::Accepted => Some("accepted"),
            ItemFilter::Rejected => Some("rejected"),
        };
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, ItemRow>(
                    "SELECT * FROM webset_items WHERE job_id = $1 AND status = $2 ORDER BY created_at",
                )
                .bind(job_id)
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ItemRow>(
                    "SELECT * FROM webset_items WHERE job_id = $1 ORDER BY created_at",
                )
                .bind(job_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(ItemRow::into_record).collect())
    }
}

#[async_trait]
impl ItemWriter for PgStore {
    async fn insert_item(&self, record: &ItemRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO webset_items
                (job_id, item_id, name, url, properties, raw_data, status,
                 rejected_by, rejection_reason, rejection_details,
                 normalized_title, similarity, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&record.job_id)
        .bind(&record.item_id)
        .bind(&record.name)
        .bind(&record.url)
        .bind(&record.properties)
        .bind(&record.raw_data)
        .bind(record.status.to_string())
        .bind(&record.rejected_by)
        .bind(&record.rejection_reason)
        .bind(&record.rejection_details)
        .bind(&record.normalized_title)
        .bind(record.similarity)
        .bind(record.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                // A duplicate key means the item was already recorded for
                // this job; not a failure.
                warn!(
                    job_id = %record.job_id,
                    item_id = %record.item_id,
                    "Duplicate item insert ignored"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn bump_counters(&self, job_id: &str, bump: CounterBump) -> Result<()> {
        let (total, unique, duplicates, reason) = match bump {
            CounterBump::Accepted => (1i64, 1i64, 0i64, None),
            CounterBump::Rejected(reason) => (1, 0, 1, Some(reason)),
            CounterBump::Pending => (1, 0, 0, None),
            CounterBump::PendingAccepted => (0, 1, 0, None),
            CounterBump::PendingRejected(reason) => (0, 0, 1, Some(reason)),
        };

        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..COUNTER_MAX_ATTEMPTS {
            match self.try_bump(job_id, total, unique, duplicates, reason).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let backoff = COUNTER_RETRY_BASE * 2u32.pow(attempt);
                    let jitter = Duration::from_millis(rand::rng().random_range(0..50));
                    warn!(
                        job_id,
                        attempt = attempt + 1,
                        error = %e,
                        "Counter update failed, retrying after backoff"
                    );
                    last_err = Some(e);
                    tokio::time::sleep(backoff + jitter).await;
                }
            }
        }
        Err(last_err.expect("retry loop always records an error"))
    }

    async fn resolve_pending(
        &self,
        job_id: &str,
        item_id: &str,
        status: ItemStatus,
        reason: Option<RejectionReason>,
        details: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webset_items
            SET status = $3,
                rejection_reason = $4,
                rejection_details = $5,
                rejected_by = CASE WHEN $4 IS NULL THEN rejected_by ELSE 'llm_adjudicator' END
            WHERE job_id = $1 AND item_id = $2
            "#,
        )
        .bind(job_id)
        .bind(item_id)
        .bind(status.to_string())
        .bind(reason.map(|r| r.as_str()))
        .bind(details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl PgStore {
    /// One atomic UPDATE per item: total plus exactly one outcome counter,
    /// plus the per-reason counter on rejections.
    async fn try_bump(
        &self,
        job_id: &str,
        total: i64,
        unique: i64,
        duplicates: i64,
        reason: Option<RejectionReason>,
    ) -> Result<()> {
        match reason {
            Some(reason) => {
                sqlx::query(
                    r#"
                    UPDATE webset_jobs
                    SET total_items = total_items + $2,
                        unique_items = unique_items + $3,
                        duplicates_rejected = duplicates_rejected + $4,
                        rejection_reasons = jsonb_set(
                            rejection_reasons,
                            ARRAY[$5],
                            to_jsonb(COALESCE((rejection_reasons->>$5)::bigint, 0) + 1),
                            true
                        )
                    WHERE job_id = $1
                    "#,
                )
                .bind(job_id)
                .bind(total)
                .bind(unique)
                .bind(duplicates)
                .bind(reason.as_str())
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE webset_jobs
                    SET total_items = total_items + $2,
                        unique_items = unique_items + $3,
                        duplicates_rejected = duplicates_rejected + $4
                    WHERE job_id = $1
                    "#,
                )
                .bind(job_id)
                .bind(total)
                .bind(unique)
                .bind(duplicates)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! Store tests require a Postgres instance. Set DATABASE_TEST_URL or
    //! they are skipped.

    use super::*;
    use crate::PgStore;
    use sqlx::PgPool;
    use websift_common::DedupMode;

    async fn test_store() -> Option<PgStore> {
        let url = std::env::var("DATABASE_TEST_URL").ok()?;
        let pool = PgPool::connect(&url).await.ok()?;
        let store = PgStore::new(pool);
        store.migrate().await.ok()?;
        sqlx::query("TRUNCATE webset_jobs, webset_items")
            .execute(store.pool())
            .await
            .ok()?;
        Some(store)
    }

    fn record(job_id: &str, item_id: &str, status: ItemStatus) -> ItemRecord {
        ItemRecord {
            job_id: job_id.into(),
            item_id: item_id.into(),
            name: "Apple".into(),
            url: "https://apple.com".into(),
            properties: None,
            raw_data: Some(serde_json::json!({"id": item_id})),
            status,
            rejected_by: None,
            rejection_reason: None,
            rejection_details: None,
            normalized_title: None,
            similarity: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn counters_add_up() {
        let Some(store) = test_store().await else {
            return;
        };
        store.insert_job("j1", "ai startups", None).await.unwrap();

        store.bump_counters("j1", CounterBump::Accepted).await.unwrap();
        store
            .bump_counters("j1", CounterBump::Rejected(RejectionReason::ExactMatch))
            .await
            .unwrap();
        store.bump_counters("j1", CounterBump::Pending).await.unwrap();
        store
            .bump_counters(
                "j1",
                CounterBump::PendingRejected(RejectionReason::LlmDuplicate),
            )
            .await
            .unwrap();

        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.total_items, 3);
        assert_eq!(job.unique_items, 1);
        assert_eq!(job.duplicates_rejected, 2);
        assert_eq!(job.rejection_reasons.get("exact_match"), Some(&1));
        assert_eq!(job.rejection_reasons.get("llm_duplicate"), Some(&1));
    }

    #[tokio::test]
    async fn duplicate_item_insert_is_ignored() {
        let Some(store) = test_store().await else {
            return;
        };
        store.insert_job("j2", "query", None).await.unwrap();

        let rec = record("j2", "a", ItemStatus::Accepted);
        store.insert_item(&rec).await.unwrap();
        store.insert_item(&rec).await.unwrap();

        let items = store.job_items("j2", ItemFilter::All).await.unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn pending_resolution_updates_record() {
        let Some(store) = test_store().await else {
            return;
        };
        store.insert_job("j3", "query", None).await.unwrap();

        store
            .insert_item(&record("j3", "b", ItemStatus::Pending))
            .await
            .unwrap();
        store
            .resolve_pending(
                "j3",
                "b",
                ItemStatus::Rejected,
                Some(RejectionReason::LlmDuplicate),
                Some("judged duplicate"),
            )
            .await
            .unwrap();

        let items = store.job_items("j3", ItemFilter::Rejected).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].rejection_reason.as_deref(), Some("llm_duplicate"));
    }

    #[tokio::test]
    async fn job_lifecycle_roundtrip() {
        let Some(store) = test_store().await else {
            return;
        };
        store.insert_job("j4", "movies", Some("movie")).await.unwrap();
        let job = store.get_job("j4").await.unwrap().unwrap();
        assert_eq!(job.status, websift_common::JobStatus::Active);
        assert_eq!(
            DedupMode::from_entity(job.entity_type.as_deref()),
            DedupMode::Entity
        );

        store.complete_job("j4").await.unwrap();
        let job = store.get_job("j4").await.unwrap().unwrap();
        assert_eq!(job.status, websift_common::JobStatus::Completed);
        assert!(job.completed_at.is_some());
    }
}
