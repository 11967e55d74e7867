//! PostgreSQL persistence for district performance records.
//!
//! The store is behind the [`PerformanceStore`] trait so the pipeline and the
//! query service can be exercised against [`InMemoryStore`] in tests. The
//! Postgres implementation relies on the composite primary key for its
//! conflict-skip load semantics: re-ingesting an already-present period is
//! silently a no-op, never an update.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use nrega_core::PerformanceRecord;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "nrega-store";

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

#[async_trait]
pub trait PerformanceStore: Send + Sync {
    /// Bulk-insert the batch, silently skipping rows whose
    /// `(district_name, report_date)` already exists. Returns the number of
    /// rows actually inserted. An empty batch is a successful no-op.
    async fn insert_missing(&self, records: &[PerformanceRecord]) -> Result<u64, StoreError>;

    /// Distinct district names for one state, alphabetically ordered.
    async fn district_names(&self, state_name: &str) -> Result<Vec<String>, StoreError>;

    /// Full series for one district, ordered by report date ascending.
    /// Districts with no rows yield an empty list; the caller decides how to
    /// signal absence.
    async fn district_series(&self, district_name: &str) -> Result<Vec<PerformanceRecord>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgPerformanceStore {
    pool: PgPool,
}

impl PgPerformanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// One multi-row `INSERT ... ON CONFLICT DO NOTHING` covering the whole
/// batch: the load is a single atomic statement, so a failure commits
/// nothing and a duplicate period is skipped without erroring.
fn bulk_insert_statement(records: &[PerformanceRecord]) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::new(
        "INSERT INTO mgnrega_performance \
         (report_date, state_name, district_name, total_individuals_worked, \
          hhs_completed_100_days, wages_paid_total, payments_on_time_percent, women_persondays) ",
    );
    builder.push_values(records, |mut row, record| {
        row.push_bind(record.report_date)
            .push_bind(&record.state_name)
            .push_bind(&record.district_name)
            .push_bind(record.total_individuals_worked)
            .push_bind(record.hhs_completed_100_days)
            .push_bind(record.wages_paid_total)
            .push_bind(record.payments_on_time_percent)
            .push_bind(record.women_persondays);
    });
    builder.push(" ON CONFLICT (district_name, report_date) DO NOTHING");
    builder
}

fn record_from_row(row: &PgRow) -> Result<PerformanceRecord, sqlx::Error> {
    Ok(PerformanceRecord {
        report_date: row.try_get("report_date")?,
        state_name: row.try_get("state_name")?,
        district_name: row.try_get("district_name")?,
        total_individuals_worked: row.try_get("total_individuals_worked")?,
        hhs_completed_100_days: row.try_get("hhs_completed_100_days")?,
        wages_paid_total: row.try_get("wages_paid_total")?,
        payments_on_time_percent: row.try_get("payments_on_time_percent")?,
        women_persondays: row.try_get("women_persondays")?,
    })
}

#[async_trait]
impl PerformanceStore for PgPerformanceStore {
    async fn insert_missing(&self, records: &[PerformanceRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut statement = bulk_insert_statement(records);
        let result = statement.build().execute(&self.pool).await?;
        debug!(
            attempted = records.len(),
            inserted = result.rows_affected(),
            "bulk insert complete"
        );
        Ok(result.rows_affected())
    }

    async fn district_names(&self, state_name: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT district_name FROM mgnrega_performance \
             WHERE state_name = $1 ORDER BY district_name",
        )
        .bind(state_name)
        .fetch_all(&self.pool)
        .await?;

        let mut names = Vec::with_capacity(rows.len());
        for row in rows {
            names.push(row.try_get("district_name")?);
        }
        Ok(names)
    }

    async fn district_series(&self, district_name: &str) -> Result<Vec<PerformanceRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT report_date, state_name, district_name, total_individuals_worked, \
                    hhs_completed_100_days, wages_paid_total, payments_on_time_percent, women_persondays \
             FROM mgnrega_performance WHERE district_name = $1 ORDER BY report_date",
        )
        .bind(district_name)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(record_from_row(row)?);
        }
        Ok(records)
    }
}

/// Map-backed store with the same first-write-wins semantics as the Postgres
/// table. Used by pipeline and handler tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    rows: Arc<Mutex<BTreeMap<(String, NaiveDate), PerformanceRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, district_name: &str, report_date: NaiveDate) -> Option<PerformanceRecord> {
        self.rows
            .lock()
            .unwrap()
            .get(&(district_name.to_string(), report_date))
            .cloned()
    }
}

#[async_trait]
impl PerformanceStore for InMemoryStore {
    async fn insert_missing(&self, records: &[PerformanceRecord]) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let mut inserted = 0;
        for record in records {
            rows.entry(record.period_key()).or_insert_with(|| {
                inserted += 1;
                record.clone()
            });
        }
        Ok(inserted)
    }

    async fn district_names(&self, state_name: &str) -> Result<Vec<String>, StoreError> {
        let rows = self.rows.lock().unwrap();
        let mut names: Vec<String> = rows
            .values()
            .filter(|r| r.state_name == state_name)
            .map(|r| r.district_name.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn district_series(&self, district_name: &str) -> Result<Vec<PerformanceRecord>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|r| r.district_name == district_name)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(district: &str, date: (i32, u32, u32), individuals: i64) -> PerformanceRecord {
        PerformanceRecord {
            report_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            state_name: "MADHYA PRADESH".to_string(),
            district_name: district.to_string(),
            total_individuals_worked: Some(individuals),
            hhs_completed_100_days: Some(10),
            wages_paid_total: Some(1000.0),
            payments_on_time_percent: Some(90.0),
            women_persondays: None,
        }
    }

    #[test]
    fn bulk_insert_is_one_conflict_skipping_statement() {
        let records = vec![record("INDORE", (2023, 1, 1), 100), record("BHOPAL", (2023, 1, 1), 200)];
        let sql = bulk_insert_statement(&records).into_sql();
        assert!(sql.starts_with("INSERT INTO mgnrega_performance"));
        assert!(sql.ends_with("ON CONFLICT (district_name, report_date) DO NOTHING"));
        // eight bound columns per row, two rows
        assert_eq!(sql.matches('$').count(), 16);
    }

    #[tokio::test]
    async fn memory_store_inserts_are_idempotent() {
        let store = InMemoryStore::new();
        let batch = vec![record("INDORE", (2023, 1, 1), 100), record("INDORE", (2023, 2, 1), 110)];

        assert_eq!(store.insert_missing(&batch).await.unwrap(), 2);
        assert_eq!(store.insert_missing(&batch).await.unwrap(), 0);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn conflicting_periods_keep_the_first_write() {
        let store = InMemoryStore::new();
        let first = record("INDORE", (2023, 1, 1), 100);
        let second = record("INDORE", (2023, 1, 1), 999);

        assert_eq!(store.insert_missing(&[first.clone(), second]).await.unwrap(), 1);
        let kept = store
            .get("INDORE", NaiveDate::from_ymd_opt(2023, 1, 1).unwrap())
            .unwrap();
        assert_eq!(kept.total_individuals_worked, Some(100));
    }

    #[tokio::test]
    async fn empty_batch_is_a_successful_no_op() {
        let store = InMemoryStore::new();
        assert_eq!(store.insert_missing(&[]).await.unwrap(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn district_names_are_state_filtered_and_sorted() {
        let store = InMemoryStore::new();
        let mut other_state = record("PUNE", (2023, 1, 1), 50);
        other_state.state_name = "MAHARASHTRA".to_string();
        store
            .insert_missing(&[
                record("UJJAIN", (2023, 1, 1), 10),
                record("BHOPAL", (2023, 1, 1), 20),
                record("BHOPAL", (2023, 2, 1), 21),
                other_state,
            ])
            .await
            .unwrap();

        let names = store.district_names("MADHYA PRADESH").await.unwrap();
        assert_eq!(names, vec!["BHOPAL".to_string(), "UJJAIN".to_string()]);
    }

    #[tokio::test]
    async fn series_comes_back_in_date_order() {
        let store = InMemoryStore::new();
        store
            .insert_missing(&[
                record("INDORE", (2023, 3, 1), 30),
                record("INDORE", (2023, 1, 1), 10),
                record("INDORE", (2023, 2, 1), 20),
            ])
            .await
            .unwrap();

        let series = store.district_series("INDORE").await.unwrap();
        let dates: Vec<NaiveDate> = series.iter().map(|r| r.report_date).collect();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2023, 2, 1).unwrap(),
                NaiveDate::from_ymd_opt(2023, 3, 1).unwrap(),
            ]
        );
    }

    // Live-database coverage for the same properties. Run with a scratch
    // database: `NREGA_TEST_DATABASE_URL=postgres://... cargo test -- --ignored`
    mod pg {
        use super::*;

        async fn test_store() -> Option<PgPerformanceStore> {
            let url = std::env::var("NREGA_TEST_DATABASE_URL").ok()?;
            let store = PgPerformanceStore::connect(&url).await.expect("connect");
            store.migrate().await.expect("migrate");
            sqlx::query("DELETE FROM mgnrega_performance WHERE state_name = '__TEST_STATE'")
                .execute(store.pool())
                .await
                .expect("cleanup");
            Some(store)
        }

        fn test_record(district: &str, month: u32, individuals: i64) -> PerformanceRecord {
            let mut r = record(district, (2023, month, 1), individuals);
            r.state_name = "__TEST_STATE".to_string();
            r
        }

        #[tokio::test]
        #[ignore = "requires PostgreSQL; set NREGA_TEST_DATABASE_URL"]
        async fn insert_missing_is_idempotent_against_postgres() {
            let Some(store) = test_store().await else { return };
            let batch = vec![test_record("__TEST_A", 1, 100), test_record("__TEST_A", 2, 110)];

            assert_eq!(store.insert_missing(&batch).await.unwrap(), 2);
            assert_eq!(store.insert_missing(&batch).await.unwrap(), 0);
            assert_eq!(store.district_series("__TEST_A").await.unwrap().len(), 2);
        }

        #[tokio::test]
        #[ignore = "requires PostgreSQL; set NREGA_TEST_DATABASE_URL"]
        async fn duplicate_period_in_one_batch_keeps_the_first_row() {
            let Some(store) = test_store().await else { return };
            let first = test_record("__TEST_B", 1, 100);
            let mut second = test_record("__TEST_B", 1, 999);
            second.wages_paid_total = Some(9.0);

            store.insert_missing(&[first, second]).await.unwrap();
            let series = store.district_series("__TEST_B").await.unwrap();
            assert_eq!(series.len(), 1);
            assert_eq!(series[0].total_individuals_worked, Some(100));
        }
    }
}
