//! Job documents: creation, lifecycle transitions, history queries, stats.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::Row;

use websift_common::{Job, JobStatus};

use crate::PgStore;

#[derive(sqlx::FromRow)]
struct JobRow {
    job_id: String,
    original_query: String,
    entity_type: Option<String>,
    status: String,
    total_items: i64,
    unique_items: i64,
    duplicates_rejected: i64,
    rejection_reasons: Json<HashMap<String, i64>>,
    error_message: Option<String>,
    next_cursor: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl JobRow {
    fn into_job(self) -> Job {
        Job {
            job_id: self.job_id,
            original_query: self.original_query,
            entity_type: self.entity_type,
            status: parse_status(&self.status),
            total_items: self.total_items,
            unique_items: self.unique_items,
            duplicates_rejected: self.duplicates_rejected,
            rejection_reasons: self.rejection_reasons.0,
            created_at: self.created_at,
            completed_at: self.completed_at,
            error_message: self.error_message,
            next_cursor: self.next_cursor,
        }
    }
}

fn parse_status(s: &str) -> JobStatus {
    match s {
        "active" => JobStatus::Active,
        "processing" => JobStatus::Processing,
        "processing_items" => JobStatus::ProcessingItems,
        "completed" => JobStatus::Completed,
        _ => JobStatus::Error,
    }
}

/// Aggregates for the overview endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct OverviewStats {
    pub total_jobs: i64,
    pub active_jobs: i64,
    pub completed_jobs: i64,
    pub error_jobs: i64,
    pub total_items: i64,
    pub unique_items: i64,
    pub duplicates_rejected: i64,
}

/// Raw table sizes for the database endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub jobs: i64,
    pub items: i64,
    pub accepted_items: i64,
    pub rejected_items: i64,
    pub pending_items: i64,
}

impl PgStore {
    /// Insert a fresh job in `active` status.
    pub async fn insert_job(
        &self,
        job_id: &str,
        original_query: &str,
        entity_type: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO webset_jobs (job_id, original_query, entity_type, status)
            VALUES ($1, $2, $3, 'active')
            "#,
        )
        .bind(job_id)
        .bind(original_query)
        .bind(entity_type)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        sqlx::query("UPDATE webset_jobs SET status = $2 WHERE job_id = $1")
            .bind(job_id)
            .bind(status.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_next_cursor(&self, job_id: &str, cursor: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE webset_jobs SET next_cursor = $2 WHERE job_id = $1")
            .bind(job_id)
            .bind(cursor)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Terminal success: stamp completion time.
    pub async fn complete_job(&self, job_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE webset_jobs SET status = 'completed', completed_at = now() WHERE job_id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal failure: record the message.
    pub async fn fail_job(&self, job_id: &str, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE webset_jobs SET status = 'error', error_message = $2, completed_at = now() WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM webset_jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(JobRow::into_job))
    }

    pub async fn list_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM webset_jobs ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(JobRow::into_job).collect())
    }

    pub async fn overview_stats(&self) -> Result<OverviewStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*)                                                             AS total_jobs,
                COUNT(*) FILTER (WHERE status IN ('active','processing','processing_items')) AS active_jobs,
                COUNT(*) FILTER (WHERE status = 'completed')                         AS completed_jobs,
                COUNT(*) FILTER (WHERE status = 'error')                             AS error_jobs,
                COALESCE(SUM(total_items), 0)::bigint                                AS total_items,
                COALESCE(SUM(unique_items), 0)::bigint                               AS unique_items,
                COALESCE(SUM(duplicates_rejected), 0)::bigint                        AS duplicates_rejected
            FROM webset_jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(OverviewStats {
            total_jobs: row.try_get("total_jobs")?,
            active_jobs: row.try_get("active_jobs")?,
            completed_jobs: row.try_get("completed_jobs")?,
            error_jobs: row.try_get("error_jobs")?,
            total_items: row.try_get("total_items")?,
            unique_items: row.try_get("unique_items")?,
            duplicates_rejected: row.try_get("duplicates_rejected")?,
        })
    }

    pub async fn database_stats(&self) -> Result<DatabaseStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM webset_jobs)                                    AS jobs,
                (SELECT COUNT(*) FROM webset_items)                                   AS items,
                (SELECT COUNT(*) FROM webset_items WHERE status = 'accepted')         AS accepted_items,
                (SELECT COUNT(*) FROM webset_items WHERE status = 'rejected')         AS rejected_items,
                (SELECT COUNT(*) FROM webset_items WHERE status = 'pending')          AS pending_items
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DatabaseStats {
            jobs: row.try_get("jobs")?,
            items: row.try_get("items")?,
            accepted_items: row.try_get("accepted_items")?,
            rejected_items: row.try_get("rejected_items")?,
            pending_items: row.try_get("pending_items")?,
        })
    }
}
