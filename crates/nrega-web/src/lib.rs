//! Axum query service: two read-only endpoints over the performance table.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use nrega_core::{PerformanceRecord, DEFAULT_STATE_NAME};
use nrega_store::{PerformanceStore, PgPerformanceStore, StoreError};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::error;

pub const CRATE_NAME: &str = "nrega-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PerformanceStore>,
    pub state_name: String,
}

impl AppState {
    pub fn new(store: Arc<dyn PerformanceStore>, state_name: impl Into<String>) -> Self {
        Self {
            store,
            state_name: state_name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct DistrictRow {
    district_name: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/districts", get(districts_handler))
        .route("/api/data/{district_name}", get(district_data_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let state_name =
        std::env::var("NREGA_STATE_NAME").unwrap_or_else(|_| DEFAULT_STATE_NAME.to_string());
    let port: u16 = std::env::var("NREGA_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3001);

    let store = PgPerformanceStore::connect(&database_url).await?;
    let state = AppState::new(Arc::new(store), state_name);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn districts_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.district_names(&state.state_name).await {
        Ok(names) => {
            let rows: Vec<DistrictRow> = names
                .into_iter()
                .map(|district_name| DistrictRow { district_name })
                .collect();
            Json(rows).into_response()
        }
        Err(err) => server_error(err),
    }
}

async fn district_data_handler(
    State(state): State<Arc<AppState>>,
    Path(district_name): Path<String>,
) -> Response {
    let district_name = district_name.trim().to_uppercase();
    match state.store.district_series(&district_name).await {
        Ok(records) => series_response(records),
        Err(err) => server_error(err),
    }
}

/// An empty series means the district does not exist: a distinct not-found
/// signal, never an empty 200.
fn series_response(records: Vec<PerformanceRecord>) -> Response {
    if records.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No data found for this district" })),
        )
            .into_response();
    }
    Json(records).into_response()
}

fn server_error(err: StoreError) -> Response {
    error!(%err, "query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Failed to fetch data" })),
    )
        .into_response()
}
