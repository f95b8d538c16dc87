//! Postgres-backed state store.
//!
//! Production store shared by controller replicas. Every trait method is a
//! single SQL statement; upserts go through `ON CONFLICT ... DO UPDATE` and
//! the empty-results increment returns the new value from the same
//! statement, so each operation is atomic on the database side.
//!
//! Blocks are stored as JSONB payloads keyed by `(hoster_prefix, uid)`,
//! which keeps the wire shape and the stored shape identical.

use async_trait::async_trait;
use sqlx::PgPool;

use forgecrawl_core::Block;

use crate::error::StateError;
use crate::store::{RunStatus, StateStore};

pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the state tables when missing. Safe to run on every start.
    pub async fn ensure_schema(&self) -> Result<(), StateError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS hoster_state (
                 hoster_prefix TEXT PRIMARY KEY,
                 highest_block_repo_id BIGINT NOT NULL DEFAULT 0,
                 highest_confirmed_repo_id BIGINT NOT NULL DEFAULT 0,
                 empty_results_counter BIGINT NOT NULL DEFAULT 0,
                 run_uid TEXT,
                 run_created_ts DOUBLE PRECISION NOT NULL DEFAULT 0,
                 run_is_finished BOOLEAN NOT NULL DEFAULT FALSE
             )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS crawl_blocks (
                 hoster_prefix TEXT NOT NULL,
                 uid TEXT NOT NULL,
                 payload JSONB NOT NULL,
                 last_attempt_at DOUBLE PRECISION NOT NULL,
                 PRIMARY KEY (hoster_prefix, uid)
             )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_counter(&self, hoster_prefix: &str, column: &str) -> Result<u64, StateError> {
        // column comes from a fixed set below, never from user input
        let sql = format!("SELECT {column} FROM hoster_state WHERE hoster_prefix = $1");
        let value: Option<i64> = sqlx::query_scalar(&sql)
            .bind(hoster_prefix)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value.unwrap_or(0).max(0) as u64)
    }

    async fn set_counter(
        &self,
        hoster_prefix: &str,
        column: &str,
        value: i64,
    ) -> Result<(), StateError> {
        let sql = format!(
            "INSERT INTO hoster_state (hoster_prefix, {column}) VALUES ($1, $2)
             ON CONFLICT (hoster_prefix) DO UPDATE SET {column} = $2"
        );
        sqlx::query(&sql)
            .bind(hoster_prefix)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for PostgresStateStore {
    async fn get_highest_block_repo_id(&self, hoster_prefix: &str) -> Result<u64, StateError> {
        self.get_counter(hoster_prefix, "highest_block_repo_id").await
    }

    async fn set_highest_block_repo_id(
        &self,
        hoster_prefix: &str,
        repo_id: u64,
    ) -> Result<(), StateError> {
        self.set_counter(hoster_prefix, "highest_block_repo_id", repo_id as i64)
            .await
    }

    async fn get_highest_confirmed_repo_id(
        &self,
        hoster_prefix: &str,
    ) -> Result<u64, StateError> {
        self.get_counter(hoster_prefix, "highest_confirmed_repo_id")
            .await
    }

    async fn set_highest_confirmed_repo_id(
        &self,
        hoster_prefix: &str,
        repo_id: u64,
    ) -> Result<(), StateError> {
        self.set_counter(hoster_prefix, "highest_confirmed_repo_id", repo_id as i64)
            .await
    }

    async fn get_empty_results_counter(&self, hoster_prefix: &str) -> Result<u64, StateError> {
        self.get_counter(hoster_prefix, "empty_results_counter").await
    }

    async fn set_empty_results_counter(
        &self,
        hoster_prefix: &str,
        count: u64,
    ) -> Result<(), StateError> {
        self.set_counter(hoster_prefix, "empty_results_counter", count as i64)
            .await
    }

    async fn increment_empty_results_counter(
        &self,
        hoster_prefix: &str,
        amount: u64,
    ) -> Result<u64, StateError> {
        let value: i64 = sqlx::query_scalar(
            "INSERT INTO hoster_state (hoster_prefix, empty_results_counter) VALUES ($1, $2)
             ON CONFLICT (hoster_prefix)
             DO UPDATE SET empty_results_counter = hoster_state.empty_results_counter + $2
             RETURNING empty_results_counter",
        )
        .bind(hoster_prefix)
        .bind(amount as i64)
        .fetch_one(&self.pool)
        .await?;
        Ok(value.max(0) as u64)
    }

    async fn push_block(&self, hoster_prefix: &str, block: &Block) -> Result<(), StateError> {
        let payload = serde_json::to_value(block)?;
        sqlx::query(
            "INSERT INTO crawl_blocks (hoster_prefix, uid, payload, last_attempt_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (hoster_prefix, uid)
             DO UPDATE SET payload = $3, last_attempt_at = $4",
        )
        .bind(hoster_prefix)
        .bind(&block.uid)
        .bind(&payload)
        .bind(block.last_attempt_at())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_block(
        &self,
        hoster_prefix: &str,
        block_uid: &str,
    ) -> Result<Option<Block>, StateError> {
        let payload: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT payload FROM crawl_blocks WHERE hoster_prefix = $1 AND uid = $2",
        )
        .bind(hoster_prefix)
        .bind(block_uid)
        .fetch_optional(&self.pool)
        .await?;
        payload
            .map(|p| serde_json::from_value(p).map_err(StateError::from))
            .transpose()
    }

    async fn delete_block(
        &self,
        hoster_prefix: &str,
        block_uid: &str,
    ) -> Result<Option<Block>, StateError> {
        let payload: Option<serde_json::Value> = sqlx::query_scalar(
            "DELETE FROM crawl_blocks WHERE hoster_prefix = $1 AND uid = $2 RETURNING payload",
        )
        .bind(hoster_prefix)
        .bind(block_uid)
        .fetch_optional(&self.pool)
        .await?;
        payload
            .map(|p| serde_json::from_value(p).map_err(StateError::from))
            .transpose()
    }

    async fn get_blocks(&self, hoster_prefix: &str) -> Result<Vec<Block>, StateError> {
        let payloads: Vec<serde_json::Value> = sqlx::query_scalar(
            "SELECT payload FROM crawl_blocks WHERE hoster_prefix = $1 ORDER BY last_attempt_at",
        )
        .bind(hoster_prefix)
        .fetch_all(&self.pool)
        .await?;
        payloads
            .into_iter()
            .map(|p| serde_json::from_value(p).map_err(StateError::from))
            .collect()
    }

    async fn delete_blocks(&self, hoster_prefix: &str) -> Result<(), StateError> {
        sqlx::query("DELETE FROM crawl_blocks WHERE hoster_prefix = $1")
            .bind(hoster_prefix)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_run_uid(&self, hoster_prefix: &str) -> Result<Option<String>, StateError> {
        let run_uid: Option<Option<String>> =
            sqlx::query_scalar("SELECT run_uid FROM hoster_state WHERE hoster_prefix = $1")
                .bind(hoster_prefix)
                .fetch_optional(&self.pool)
                .await?;
        Ok(run_uid.flatten())
    }

    async fn set_run_uid(&self, hoster_prefix: &str, run_uid: &str) -> Result<(), StateError> {
        sqlx::query(
            "INSERT INTO hoster_state (hoster_prefix, run_uid) VALUES ($1, $2)
             ON CONFLICT (hoster_prefix) DO UPDATE SET run_uid = $2",
        )
        .bind(hoster_prefix)
        .bind(run_uid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run_created_ts(&self, hoster_prefix: &str) -> Result<f64, StateError> {
        let ts: Option<f64> =
            sqlx::query_scalar("SELECT run_created_ts FROM hoster_state WHERE hoster_prefix = $1")
                .bind(hoster_prefix)
                .fetch_optional(&self.pool)
                .await?;
        Ok(ts.unwrap_or(0.0))
    }

    async fn set_run_created_ts(&self, hoster_prefix: &str, ts: f64) -> Result<(), StateError> {
        sqlx::query(
            "INSERT INTO hoster_state (hoster_prefix, run_created_ts) VALUES ($1, $2)
             ON CONFLICT (hoster_prefix) DO UPDATE SET run_created_ts = $2",
        )
        .bind(hoster_prefix)
        .bind(ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run_is_finished(&self, hoster_prefix: &str) -> Result<bool, StateError> {
        let finished: Option<bool> =
            sqlx::query_scalar("SELECT run_is_finished FROM hoster_state WHERE hoster_prefix = $1")
                .bind(hoster_prefix)
                .fetch_optional(&self.pool)
                .await?;
        Ok(finished.unwrap_or(false))
    }

    async fn set_run_is_finished(
        &self,
        hoster_prefix: &str,
        finished: bool,
    ) -> Result<(), StateError> {
        sqlx::query(
            "INSERT INTO hoster_state (hoster_prefix, run_is_finished) VALUES ($1, $2)
             ON CONFLICT (hoster_prefix) DO UPDATE SET run_is_finished = $2",
        )
        .bind(hoster_prefix)
        .bind(finished)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run_status(&self, hoster_prefix: &str) -> Result<RunStatus, StateError> {
        let row: Option<(i64, i64, i64, Option<String>, f64, bool)> = sqlx::query_as(
            "SELECT highest_block_repo_id, highest_confirmed_repo_id, empty_results_counter,
                    run_uid, run_created_ts, run_is_finished
             FROM hoster_state WHERE hoster_prefix = $1",
        )
        .bind(hoster_prefix)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((block_id, confirmed_id, empties, run_uid, created_ts, finished)) => RunStatus {
                highest_block_repo_id: block_id.max(0) as u64,
                highest_confirmed_repo_id: confirmed_id.max(0) as u64,
                empty_results_counter: empties.max(0) as u64,
                run_uid,
                run_created_ts: created_ts,
                run_is_finished: finished,
            },
            None => RunStatus {
                highest_block_repo_id: 0,
                highest_confirmed_repo_id: 0,
                empty_results_counter: 0,
                run_uid: None,
                run_created_ts: 0.0,
                run_is_finished: false,
            },
        })
    }
}
