//! Controller configuration from environment variables.

use anyhow::{Context, Result};
use url::Url;

use forgecrawl_core::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_BLOCK_TIMEOUT_SECS, DEFAULT_EMPTY_RESULTS_MAX,
};
use forgecrawl_core::CrawlConfig;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub bind_addr: String,
    /// Base URL workers reach this service under; callback URLs are built
    /// from it.
    pub external_url: Url,
    pub database_url: Option<String>,
    pub crawl: CrawlConfig,
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let external_url = std::env::var("EXTERNAL_URL")
            .unwrap_or_else(|_| format!("http://{bind_addr}/"))
            .parse()
            .context("Invalid EXTERNAL_URL")?;

        Ok(Self {
            bind_addr,
            external_url,
            database_url: std::env::var("DATABASE_URL").ok(),
            crawl: CrawlConfig {
                batch_size: std::env::var("BATCH_SIZE")
                    .unwrap_or_else(|_| DEFAULT_BATCH_SIZE.to_string())
                    .parse()
                    .context("Invalid BATCH_SIZE")?,
                block_timeout: std::env::var("BLOCK_TIMEOUT_SECS")
                    .unwrap_or_else(|_| DEFAULT_BLOCK_TIMEOUT_SECS.to_string())
                    .parse()
                    .context("Invalid BLOCK_TIMEOUT_SECS")?,
                empty_results_max: std::env::var("EMPTY_RESULTS_MAX")
                    .unwrap_or_else(|_| DEFAULT_EMPTY_RESULTS_MAX.to_string())
                    .parse()
                    .context("Invalid EMPTY_RESULTS_MAX")?,
            },
        })
    }
}
