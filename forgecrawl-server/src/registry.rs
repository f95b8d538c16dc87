//! Registered hoster lookup, optionally persisted in Postgres.

use serde::Deserialize;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use forgecrawl_core::{Hoster, HosterType};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown hoster type: {0}")]
    UnknownType(String),
    #[error("registry store failed: {0}")]
    Store(String),
}

impl From<sqlx::Error> for RegistryError {
    fn from(e: sqlx::Error) -> Self {
        RegistryError::Store(e.to_string())
    }
}

/// Registration payload: `{type, landingpage_url, api_url, config}`.
#[derive(Debug, Deserialize)]
pub struct RegisterHosterRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub landingpage_url: String,
    pub api_url: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// In-memory hoster list, loaded from and written through to Postgres when
/// a pool is available.
pub struct HosterRegistry {
    hosters: RwLock<Vec<Hoster>>,
    pool: Option<PgPool>,
}

impl HosterRegistry {
    pub fn new(pool: Option<PgPool>) -> Self {
        Self {
            hosters: RwLock::new(Vec::new()),
            pool,
        }
    }

    /// Create the hosters table when missing and load existing rows.
    pub async fn load(&self) -> Result<(), RegistryError> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS hosters (
                 id SERIAL PRIMARY KEY,
                 type TEXT NOT NULL,
                 landingpage_url TEXT NOT NULL DEFAULT '',
                 api_url TEXT NOT NULL UNIQUE,
                 config JSONB NOT NULL DEFAULT '{}'
             )",
        )
        .execute(pool)
        .await?;

        let rows =
            sqlx::query("SELECT id, type, landingpage_url, api_url, config FROM hosters ORDER BY id")
                .fetch_all(pool)
                .await?;

        let mut hosters = Vec::new();
        for row in rows {
            let id: i32 = row.get("id");
            let kind: String = row.get("type");
            match kind.parse::<HosterType>() {
                Ok(kind) => hosters.push(Hoster {
                    id: id as i64,
                    kind,
                    landingpage_url: row.get("landingpage_url"),
                    api_url: row.get("api_url"),
                    config: row.get("config"),
                }),
                Err(e) => warn!("Skipping hoster row {}: {}", id, e),
            }
        }
        info!("Loaded {} hosters from database", hosters.len());
        *self.hosters.write().await = hosters;
        Ok(())
    }

    /// Register a hoster, reusing the row of an already-known `api_url`.
    pub async fn register(&self, req: RegisterHosterRequest) -> Result<Hoster, RegistryError> {
        let kind = req
            .kind
            .parse::<HosterType>()
            .map_err(|e| RegistryError::UnknownType(e.0))?;
        let config = if req.config.is_null() {
            serde_json::json!({})
        } else {
            req.config
        };

        let mut hosters = self.hosters.write().await;
        let id = match &self.pool {
            Some(pool) => {
                let row = sqlx::query(
                    "INSERT INTO hosters (type, landingpage_url, api_url, config)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (api_url)
                     DO UPDATE SET type = $1, landingpage_url = $2, config = $4
                     RETURNING id",
                )
                .bind(kind.as_str())
                .bind(&req.landingpage_url)
                .bind(&req.api_url)
                .bind(&config)
                .fetch_one(pool)
                .await?;
                row.get::<i32, _>("id") as i64
            }
            None => match hosters.iter().find(|h| h.api_url == req.api_url) {
                Some(existing) => existing.id,
                None => hosters.iter().map(|h| h.id).max().unwrap_or(0) + 1,
            },
        };

        let hoster = Hoster {
            id,
            kind,
            landingpage_url: req.landingpage_url,
            api_url: req.api_url,
            config,
        };
        match hosters.iter_mut().find(|h| h.id == id) {
            Some(existing) => *existing = hoster.clone(),
            None => hosters.push(hoster.clone()),
        }
        info!("Registered hoster {} ({})", hoster.api_url, hoster.kind);
        Ok(hoster)
    }

    pub async fn get(&self, id: i64) -> Option<Hoster> {
        self.hosters.read().await.iter().find(|h| h.id == id).cloned()
    }

    pub async fn by_type(&self, kind: HosterType) -> Vec<Hoster> {
        self.hosters
            .read()
            .await
            .iter()
            .filter(|h| h.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn list(&self) -> Vec<Hoster> {
        self.hosters.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: &str, api_url: &str) -> RegisterHosterRequest {
        RegisterHosterRequest {
            kind: kind.to_string(),
            landingpage_url: format!("https://{kind}.example"),
            api_url: api_url.to_string(),
            config: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn in_memory_registration_assigns_sequential_ids() {
        let registry = HosterRegistry::new(None);
        let a = registry
            .register(request("gitea", "https://a.example/api"))
            .await
            .unwrap();
        let b = registry
            .register(request("github", "https://b.example/api"))
            .await
            .unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(registry.list().await.len(), 2);
    }

    #[tokio::test]
    async fn re_registering_same_api_url_reuses_the_id() {
        let registry = HosterRegistry::new(None);
        let first = registry
            .register(request("gitea", "https://a.example/api"))
            .await
            .unwrap();
        let second = registry
            .register(request("gitea", "https://a.example/api"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_type_is_rejected() {
        let registry = HosterRegistry::new(None);
        let err = registry
            .register(request("sourcehut", "https://sh.example/api"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownType(_)));
    }

    #[tokio::test]
    async fn null_config_defaults_to_empty_object() {
        let registry = HosterRegistry::new(None);
        let hoster = registry
            .register(request("gitea", "https://a.example/api"))
            .await
            .unwrap();
        assert_eq!(hoster.config, serde_json::json!({}));
    }

    #[tokio::test]
    async fn lookups_by_id_and_type() {
        let registry = HosterRegistry::new(None);
        let a = registry
            .register(request("gitea", "https://a.example/api"))
            .await
            .unwrap();
        registry
            .register(request("github", "https://b.example/api"))
            .await
            .unwrap();

        assert_eq!(registry.get(a.id).await.unwrap().api_url, a.api_url);
        assert!(registry.get(999).await.is_none());
        let gitea = registry.by_type(HosterType::Gitea).await;
        assert_eq!(gitea.len(), 1);
        assert_eq!(gitea[0].id, a.id);
    }
}
