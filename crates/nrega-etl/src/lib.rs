//! One-shot ingestion pipeline: extract all pages, transform, bulk load.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use nrega_core::DEFAULT_STATE_NAME;
use nrega_datagov::{
    extract_all, transform, DatagovClient, DatagovConfig, ExtractError, PageFetch,
    DEFAULT_BASE_URL, DEFAULT_PAGE_SIZE, DEFAULT_RESOURCE_ID,
};
use nrega_store::{PerformanceStore, PgPerformanceStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "nrega-etl";

/// Operator-facing failure classes. Extraction and load failures abort the
/// run; per-record transform rejections do not appear here because they are
/// never fatal.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("load failed: {0}")]
    Load(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub database_url: String,
    pub api_key: String,
    pub api_base_url: String,
    pub resource_id: String,
    pub state_name: String,
    pub page_size: u64,
    pub http_timeout_secs: u64,
}

impl IngestConfig {
    /// Credentials have no defaults: a run without `DATABASE_URL` and
    /// `NREGA_API_KEY` fails fast instead of silently targeting a live
    /// system.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: require_env("DATABASE_URL")?,
            api_key: require_env("NREGA_API_KEY")?,
            api_base_url: std::env::var("NREGA_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            resource_id: std::env::var("NREGA_RESOURCE_ID")
                .unwrap_or_else(|_| DEFAULT_RESOURCE_ID.to_string()),
            state_name: std::env::var("NREGA_STATE_NAME")
                .unwrap_or_else(|_| DEFAULT_STATE_NAME.to_string()),
            page_size: std::env::var("NREGA_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PAGE_SIZE),
            http_timeout_secs: std::env::var("NREGA_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        })
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set"))
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Raw records fetched across all pages.
    pub fetched: usize,
    /// Records discarded by the transformer.
    pub rejected: usize,
    /// Valid records handed to the loader.
    pub loaded: usize,
    /// Rows the store actually added.
    pub inserted: u64,
    /// Rows skipped because their period already existed.
    pub skipped: u64,
}

/// The three stages run strictly in order with no overlap: every page is
/// fetched before any record is transformed, and every record is transformed
/// before the single load statement executes. Two concurrent runs are only
/// safe through the store's conflict-skip behavior; there is no in-process
/// locking.
pub struct IngestPipeline<F, S> {
    fetcher: F,
    store: S,
    page_size: u64,
}

impl<F, S> IngestPipeline<F, S>
where
    F: PageFetch,
    S: PerformanceStore,
{
    pub fn new(fetcher: F, store: S, page_size: u64) -> Self {
        Self {
            fetcher,
            store,
            page_size,
        }
    }

    pub async fn run_once(&self) -> Result<IngestSummary, EtlError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let raw = extract_all(&self.fetcher, self.page_size).await?;
        let fetched = raw.len();

        let mut records = Vec::with_capacity(raw.len());
        let mut rejected = 0usize;
        for row in &raw {
            match transform(row) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    rejected += 1;
                    warn!(district = %row.district_name, %reason, "skipping unusable record");
                }
            }
        }

        let inserted = self.store.insert_missing(&records).await?;
        let finished_at = Utc::now();

        let summary = IngestSummary {
            run_id,
            started_at,
            finished_at,
            fetched,
            rejected,
            loaded: records.len(),
            inserted,
            skipped: records.len() as u64 - inserted,
        };
        info!(
            run_id = %summary.run_id,
            fetched = summary.fetched,
            rejected = summary.rejected,
            inserted = summary.inserted,
            skipped = summary.skipped,
            "ingest run complete"
        );
        Ok(summary)
    }
}

pub async fn run_ingest_once_from_env() -> Result<IngestSummary> {
    let config = IngestConfig::from_env()?;
    let client = DatagovClient::new(DatagovConfig {
        base_url: config.api_base_url.clone(),
        resource_id: config.resource_id.clone(),
        api_key: config.api_key.clone(),
        state_name: config.state_name.clone(),
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(format!("nrega-dashboard/{}", env!("CARGO_PKG_VERSION"))),
    })?;
    let store = PgPerformanceStore::connect(&config.database_url)
        .await
        .context("connecting to the performance database")?;

    let pipeline = IngestPipeline::new(client, store, config.page_size);
    let summary = pipeline.run_once().await?;
    Ok(summary)
}
