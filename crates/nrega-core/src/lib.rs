//! Core domain model for the NREGA district performance dashboard.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "nrega-core";

/// State whose districts the dashboard covers. Overridable via
/// `NREGA_STATE_NAME`, uppercased to match how the upstream API stores it.
pub const DEFAULT_STATE_NAME: &str = "MADHYA PRADESH";

/// One reporting period for one district: the cleaned, normalized shape the
/// ingestion pipeline persists and the query service returns.
///
/// Numeric fields are `None` when the upstream value was absent or not a
/// valid non-negative number; they are never zero-filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// First day of the reporting month.
    pub report_date: NaiveDate,
    pub state_name: String,
    /// Uppercased; consumers look districts up case-insensitively.
    pub district_name: String,
    pub total_individuals_worked: Option<i64>,
    pub hhs_completed_100_days: Option<i64>,
    pub wages_paid_total: Option<f64>,
    pub payments_on_time_percent: Option<f64>,
    pub women_persondays: Option<f64>,
}

impl PerformanceRecord {
    /// Natural key of a reporting period. Two records with the same key
    /// describe the same (district, month) pair.
    pub fn period_key(&self) -> (String, NaiveDate) {
        (self.district_name.clone(), self.report_date)
    }
}
