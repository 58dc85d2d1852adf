//! REST API endpoints for the deepwatt-service.
//!
//! # Lock Acquisition
//!
//! Handlers take `state.store` (Mutex) only for the duration of a single
//! store call, and `state.cache` (RwLock) only for a single read. No handler
//! holds both at once.
//!
//! # Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]:
//! `{"error": "..."}` with 404 for missing data, 400 for unreadable request
//! bodies and 500 for store failures.
//!
//! # Example
//!
//! ```ignore
//! use deepwatt_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use deepwatt_store::{Budget, StoredAnomaly, StoredReading};
use deepwatt_types::{RealtimeSample, TimeWindow};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::history::{self, parse_epoch_param};
use crate::state::{AppState, ListenerStats};

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Health and status
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        // Data endpoints
        .route("/realtime/{device_id}", get(get_realtime))
        .route("/data/{device_id}", get(get_data))
        .route("/anomalies/{device_id}", get(get_anomalies))
        // Budgets
        .route("/budget/{monitoring_device_id}", get(get_budget))
        .route("/update-budget/{monitoring_device_id}", post(update_budget))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Service status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Service version.
    pub version: &'static str,
    /// Current timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Listener connection state and counters.
    pub listener: ListenerStats,
    /// Devices with an entry in the realtime cache.
    pub cached_devices: usize,
    /// Maximum age of a realtime sample, in seconds.
    pub realtime_ttl_secs: i64,
    /// Readings in the store.
    pub stored_readings: u64,
    /// Budgets in the store.
    pub budgets: u64,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, AppError> {
    let (stored_readings, budgets) = {
        let store = state.store.lock().await;
        (store.count_readings(None)?, store.count_budgets()?)
    };

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        listener: state.listener.stats(),
        cached_devices: state.cache.len().await,
        realtime_ttl_secs: state.cache.ttl_secs(),
        stored_readings,
        budgets,
    }))
}

/// Latest fresh sample for a device.
async fn get_realtime(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<RealtimeSample>, AppError> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    state
        .cache
        .get(&device_id, now)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No data available".to_string()))
}

/// Query parameters for windowed history.
///
/// Values are kept as raw strings so that a malformed bound falls back to
/// the default window instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct WindowParams {
    #[serde(rename = "startTime")]
    pub start_time: Option<String>,
    #[serde(rename = "endTime")]
    pub end_time: Option<String>,
}

impl WindowParams {
    fn window(&self) -> TimeWindow {
        TimeWindow::resolve_now(
            parse_epoch_param(self.start_time.as_deref()),
            parse_epoch_param(self.end_time.as_deref()),
        )
    }
}

async fn get_data(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Json<Vec<StoredReading>>, AppError> {
    let window = params.window();
    debug!(
        "Querying readings for {} between {} and {}",
        device_id, window.start, window.end
    );
    let readings = history::readings(&state, &device_id, window).await?;
    Ok(Json(readings))
}

async fn get_anomalies(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Json<Vec<StoredAnomaly>>, AppError> {
    let window = params.window();
    let anomalies = history::anomalies(&state, &device_id, window).await?;
    Ok(Json(anomalies))
}

async fn get_budget(
    State(state): State<Arc<AppState>>,
    Path(monitoring_device_id): Path<String>,
) -> Result<Json<Budget>, AppError> {
    let store = state.store.lock().await;
    store
        .get_budget(&monitoring_device_id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No budget available".to_string()))
}

/// Request to create or replace a budget.
#[derive(Debug, Deserialize)]
pub struct UpdateBudgetRequest {
    #[serde(alias = "budget")]
    pub threshold: f64,
    #[serde(rename = "feedbackDeviceID", alias = "feedback_device_id")]
    pub feedback_device_id: String,
}

/// Generic message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Create or replace the budget of a monitoring device.
///
/// The body is decoded by hand so that every unreadable body, whatever the
/// cause, is answered with 400.
async fn update_budget(
    State(state): State<Arc<AppState>>,
    Path(monitoring_device_id): Path<String>,
    body: Bytes,
) -> Result<Json<MessageResponse>, AppError> {
    let request: UpdateBudgetRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid input: {}", e)))?;

    let budget = Budget {
        monitoring_device_id,
        feedback_device_id: request.feedback_device_id,
        threshold: request.threshold,
    };
    state.store.lock().await.upsert_budget(&budget)?;

    Ok(Json(MessageResponse {
        message: "Budget updated successfully".to_string(),
    }))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Store(deepwatt_store::Error),
}

impl From<deepwatt_store::Error> for AppError {
    fn from(e: deepwatt_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e) => {
                tracing::error!("Store error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
