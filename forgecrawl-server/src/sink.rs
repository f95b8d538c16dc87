//! Repository sink: idempotent persistence of crawled repo records.
//!
//! Workers deliver hoster-specific payloads as opaque JSON. The sink only
//! extracts the native numeric `id` and upserts by `(hoster_id, repo_id)`,
//! which is what makes at-least-once block delivery safe.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, warn};

use forgecrawl_core::{Hoster, HosterType};

#[derive(Debug, Error)]
pub enum SinkError {
    /// No repo class is registered for this hoster type.
    #[error("unknown repo type")]
    UnknownRepoType(String),
    #[error("repository persistence failed: {0}")]
    Persist(String),
}

impl From<sqlx::Error> for SinkError {
    fn from(e: sqlx::Error) -> Self {
        SinkError::Persist(e.to_string())
    }
}

/// Table per supported hoster type. `gitlab` has no repo class yet; its
/// callbacks are rejected, which existing workers rely on.
fn repo_table(kind: HosterType) -> Option<&'static str> {
    match kind {
        HosterType::Github => Some("github_repositories"),
        HosterType::Gitea => Some("gitea_repositories"),
        HosterType::Gitlab => None,
    }
}

#[async_trait]
pub trait RepoSink: Send + Sync {
    /// Upsert `repo_dicts` for this hoster. Records without a numeric `id`
    /// are skipped. Returns how many records were written.
    async fn store_repos(
        &self,
        hoster: &Hoster,
        repo_dicts: &[serde_json::Value],
    ) -> Result<usize, SinkError>;
}

pub struct PostgresRepoSink {
    pool: PgPool,
}

impl PostgresRepoSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), SinkError> {
        for table in ["github_repositories", "gitea_repositories"] {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                     hoster_id BIGINT NOT NULL,
                     repo_id BIGINT NOT NULL,
                     name TEXT,
                     payload JSONB NOT NULL,
                     updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                     PRIMARY KEY (hoster_id, repo_id)
                 )"
            ))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RepoSink for PostgresRepoSink {
    async fn store_repos(
        &self,
        hoster: &Hoster,
        repo_dicts: &[serde_json::Value],
    ) -> Result<usize, SinkError> {
        let table = repo_table(hoster.kind)
            .ok_or_else(|| SinkError::UnknownRepoType(hoster.kind.to_string()))?;

        let mut stored = 0;
        for repo in repo_dicts {
            let Some(repo_id) = repo.get("id").and_then(|v| v.as_i64()) else {
                warn!("skipping repo record without numeric id for hoster {}", hoster.id);
                continue;
            };
            let name = repo.get("name").and_then(|v| v.as_str());
            sqlx::query(&format!(
                "INSERT INTO {table} (hoster_id, repo_id, name, payload)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (hoster_id, repo_id)
                 DO UPDATE SET name = $3, payload = $4, updated_at = now()"
            ))
            .bind(hoster.id)
            .bind(repo_id)
            .bind(name)
            .bind(repo)
            .execute(&self.pool)
            .await?;
            stored += 1;
        }
        debug!("stored {} repos for hoster {}", stored, hoster.id);
        Ok(stored)
    }
}

/// Keeps records in a map; used by tests and persistence-free deployments.
#[derive(Default)]
pub struct MemoryRepoSink {
    repos: Mutex<HashMap<(i64, i64), serde_json::Value>>,
}

impl MemoryRepoSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.repos.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl RepoSink for MemoryRepoSink {
    async fn store_repos(
        &self,
        hoster: &Hoster,
        repo_dicts: &[serde_json::Value],
    ) -> Result<usize, SinkError> {
        repo_table(hoster.kind)
            .ok_or_else(|| SinkError::UnknownRepoType(hoster.kind.to_string()))?;

        let mut repos = self.repos.lock().unwrap_or_else(|e| e.into_inner());
        let mut stored = 0;
        for repo in repo_dicts {
            let Some(repo_id) = repo.get("id").and_then(|v| v.as_i64()) else {
                warn!("skipping repo record without numeric id for hoster {}", hoster.id);
                continue;
            };
            repos.insert((hoster.id, repo_id), repo.clone());
            stored += 1;
        }
        Ok(stored)
    }
}
