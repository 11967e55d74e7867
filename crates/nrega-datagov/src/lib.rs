//! data.gov.in source adapter: paginated extraction + record transformation.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::{self, TryStreamExt};
use nrega_core::PerformanceRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "nrega-datagov";

pub const DEFAULT_BASE_URL: &str = "https://api.data.gov.in/resource/";
/// Resource id of the published MGNREGA district performance dataset.
pub const DEFAULT_RESOURCE_ID: &str = "ee03643a-ee4c-48c2-ac30-9f2ff26ab722";
/// Upstream caps a single page at 100 records.
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// One raw record as the upstream API returns it. Field names are the
/// upstream's verbatim keys, including the misspelled payments field.
///
/// Missing keys deserialize to empty/`None` rather than failing the whole
/// page; unusable records are rejected one at a time by [`transform`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPerformanceRow {
    #[serde(default)]
    pub state_name: String,
    #[serde(default)]
    pub district_name: String,
    /// Financial year formatted "YYYY-YYYY".
    #[serde(default)]
    pub fin_year: String,
    /// Month name, e.g. "January".
    #[serde(default)]
    pub month: String,
    #[serde(rename = "Total_Individuals_Worked", default)]
    pub total_individuals_worked: Option<RawNumber>,
    #[serde(rename = "Total_No_of_HHs_completed_100_Days_of_Wage_Employment", default)]
    pub hhs_completed_100_days: Option<RawNumber>,
    #[serde(rename = "Wages", default)]
    pub wages_paid_total: Option<RawNumber>,
    #[serde(rename = "percentage_payments_gererated_within_15_days", default)]
    pub payments_on_time_percent: Option<RawNumber>,
    #[serde(rename = "Women_Persondays", default)]
    pub women_persondays: Option<RawNumber>,
}

/// The API encodes numbers inconsistently: sometimes JSON numbers, sometimes
/// strings with thousands separators or placeholders like "N/A".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawNumber {
    Number(f64),
    Text(String),
}

/// JSON envelope of one page. `total` is the server-reported count of all
/// records matching the filter, not the count in this page.
#[derive(Debug, Clone, Deserialize)]
pub struct PageEnvelope {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub records: Vec<RawPerformanceRow>,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("page request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} fetching offset {offset}")]
    HttpStatus { status: u16, offset: u64 },
}

/// Seam between the pagination loop and the HTTP client, so extraction can
/// be driven by a scripted fetcher in tests.
#[async_trait]
pub trait PageFetch: Send + Sync {
    async fn fetch_page(&self, offset: u64, limit: u64) -> Result<PageEnvelope, ExtractError>;
}

#[derive(Debug, Clone)]
pub struct DatagovConfig {
    pub base_url: String,
    pub resource_id: String,
    pub api_key: String,
    pub state_name: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

#[derive(Debug)]
pub struct DatagovClient {
    client: reqwest::Client,
    config: DatagovConfig,
}

impl DatagovClient {
    pub fn new(config: DatagovConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl PageFetch for DatagovClient {
    async fn fetch_page(&self, offset: u64, limit: u64) -> Result<PageEnvelope, ExtractError> {
        let url = format!("{}{}", self.config.base_url, self.config.resource_id);
        let offset_param = offset.to_string();
        let limit_param = limit.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("api-key", self.config.api_key.as_str()),
                ("format", "json"),
                ("offset", offset_param.as_str()),
                ("limit", limit_param.as_str()),
                ("filters[state_name]", self.config.state_name.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::HttpStatus {
                status: status.as_u16(),
                offset,
            });
        }

        Ok(response.json().await?)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PageCursor {
    offset: u64,
    fetched: u64,
    total: Option<u64>,
}

/// Pull every matching record by walking pages sequentially: a lazy page
/// stream folded into one record list, single pass, no partial results.
///
/// Stops when a page comes back empty or the accumulated count reaches the
/// total the server reported on the first page. Any page failure aborts the
/// whole extraction. An empty first page yields `Ok(vec![])`.
pub async fn extract_all<F>(fetcher: &F, page_size: u64) -> Result<Vec<RawPerformanceRow>, ExtractError>
where
    F: PageFetch,
{
    let pages = stream::try_unfold(PageCursor::default(), move |cursor| async move {
        if let Some(total) = cursor.total {
            if cursor.fetched >= total {
                return Ok(None);
            }
        }

        let page = fetcher.fetch_page(cursor.offset, page_size).await?;
        if page.records.is_empty() {
            return Ok(None);
        }

        let next = PageCursor {
            offset: cursor.offset + page_size,
            fetched: cursor.fetched + page.records.len() as u64,
            total: cursor.total.or(Some(page.total)),
        };
        info!(fetched = next.fetched, total = page.total, "fetched page");
        Ok(Some((page.records, next)))
    });

    pages
        .try_fold(Vec::new(), |mut all, mut records| async move {
            all.append(&mut records);
            Ok(all)
        })
        .await
}

/// Why a raw record could not be turned into a [`PerformanceRecord`].
/// Rejections are routine: they are counted and logged by the pipeline,
/// never fatal to the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformRejection {
    #[error("fiscal year {0:?} has no parsable calendar year")]
    FiscalYear(String),
    #[error("month {month:?} in fiscal year {fin_year:?} does not form a valid report date")]
    ReportDate { fin_year: String, month: String },
}

/// Map one raw upstream record to its normalized form, or reject it.
/// Pure and deterministic; all I/O stays in the caller.
pub fn transform(row: &RawPerformanceRow) -> Result<PerformanceRecord, TransformRejection> {
    let report_date = derive_report_date(&row.fin_year, &row.month)?;
    Ok(PerformanceRecord {
        report_date,
        state_name: row.state_name.trim().to_string(),
        district_name: row.district_name.trim().to_uppercase(),
        total_individuals_worked: clean_count(row.total_individuals_worked.as_ref()),
        hhs_completed_100_days: clean_count(row.hhs_completed_100_days.as_ref()),
        wages_paid_total: clean_number(row.wages_paid_total.as_ref()),
        payments_on_time_percent: clean_number(row.payments_on_time_percent.as_ref()),
        women_persondays: clean_number(row.women_persondays.as_ref()),
    })
}

/// Parse a possibly string-encoded number, stripping thousands separators.
/// Anything unparsable, negative, or non-finite becomes `None`, never zero.
pub fn clean_number(value: Option<&RawNumber>) -> Option<f64> {
    let parsed = match value? {
        RawNumber::Number(n) => Some(*n),
        RawNumber::Text(text) => text.replace(',', "").trim().parse::<f64>().ok(),
    }?;
    (parsed.is_finite() && parsed >= 0.0).then_some(parsed)
}

fn clean_count(value: Option<&RawNumber>) -> Option<i64> {
    clean_number(value).map(|n| n as i64)
}

/// First day of the reporting month. The calendar year is the leading
/// component of the "YYYY-YYYY" fiscal year string, matching how the
/// upstream dashboard labels its periods.
fn derive_report_date(fin_year: &str, month: &str) -> Result<NaiveDate, TransformRejection> {
    let year: i32 = fin_year
        .split('-')
        .next()
        .unwrap_or_default()
        .trim()
        .parse()
        .map_err(|_| TransformRejection::FiscalYear(fin_year.to_string()))?;

    NaiveDate::parse_from_str(&format!("{} 1 {year}", month.trim()), "%B %d %Y").map_err(|_| {
        TransformRejection::ReportDate {
            fin_year: fin_year.to_string(),
            month: month.to_string(),
        }
    })
}
