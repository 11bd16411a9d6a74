//! Postgres persistence for jobs and items.
//!
//! The engine treats every method as best-effort: errors are returned to the
//! caller, which logs and continues. Counter updates are single-statement
//! atomic increments with bounded jittered retry on conflicts.

mod items;
mod jobs;

pub use items::ItemFilter;
pub use jobs::{DatabaseStats, OverviewStats};

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indices if they do not exist.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS webset_jobs (
                job_id              TEXT         PRIMARY KEY,
                original_query      TEXT         NOT NULL,
                entity_type         TEXT,
                status              TEXT         NOT NULL,
                total_items         BIGINT       NOT NULL DEFAULT 0,
                unique_items        BIGINT       NOT NULL DEFAULT 0,
                duplicates_rejected BIGINT       NOT NULL DEFAULT 0,
                rejection_reasons   JSONB        NOT NULL DEFAULT '{}'::jsonb,
                error_message       TEXT,
                next_cursor         TEXT,
                created_at          TIMESTAMPTZ  NOT NULL DEFAULT now(),
                completed_at        TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS webset_items (
                id                 BIGSERIAL    PRIMARY KEY,
                job_id             TEXT         NOT NULL,
                item_id            TEXT         NOT NULL,
                name               TEXT         NOT NULL DEFAULT '',
                url                TEXT         NOT NULL DEFAULT '',
                properties         JSONB,
                raw_data           JSONB,
                status             TEXT         NOT NULL,
                rejected_by        TEXT,
                rejection_reason   TEXT,
                rejection_details  TEXT,
                normalized_title   TEXT,
                similarity         DOUBLE PRECISION,
                created_at         TIMESTAMPTZ  NOT NULL DEFAULT now(),
                UNIQUE (job_id, item_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_jobs_created ON webset_jobs (created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON webset_jobs (status, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_entity_created ON webset_jobs (entity_type, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_items_job_status ON webset_items (job_id, status)",
            "CREATE INDEX IF NOT EXISTS idx_items_job_created ON webset_items (job_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_items_title_job ON webset_items (normalized_title, job_id)",
            "CREATE INDEX IF NOT EXISTS idx_items_rejected_by ON webset_items (rejected_by)",
            "CREATE INDEX IF NOT EXISTS idx_items_reason_job ON webset_items (rejection_reason, job_id)",
        ] {
            sqlx::query(index).execute(&self.pool).await?;
        }

        Ok(())
    }
}
