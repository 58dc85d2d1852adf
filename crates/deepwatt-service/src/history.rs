//! Time-windowed queries over persisted readings and anomalies.

use deepwatt_store::{AnomalyQuery, ReadingQuery, StoredAnomaly, StoredReading};
use deepwatt_types::TimeWindow;

use crate::state::AppState;

/// Parse an epoch-seconds query parameter.
///
/// Missing or unparsable values yield `None`, which [`TimeWindow::resolve`]
/// treats the same as `0`.
pub fn parse_epoch_param(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|value| value.trim().parse().ok())
}

/// Readings of `device_id` whose device timestamp lies in `window`.
///
/// Ordered by timestamp then insertion. Readings stored without a device
/// timestamp are reported at their ingestion second.
pub async fn readings(
    state: &AppState,
    device_id: &str,
    window: TimeWindow,
) -> deepwatt_store::Result<Vec<StoredReading>> {
    let query = ReadingQuery::new()
        .device(device_id)
        .since(window.start)
        .until(window.end);

    let readings = state.store.lock().await.query_readings(&query)?;
    Ok(readings.into_iter().map(StoredReading::normalized).collect())
}

/// Anomalies of `device_id` whose timestamp lies in `window`.
pub async fn anomalies(
    state: &AppState,
    device_id: &str,
    window: TimeWindow,
) -> deepwatt_store::Result<Vec<StoredAnomaly>> {
    let query = AnomalyQuery::new()
        .device(device_id)
        .since(window.start)
        .until(window.end);

    state.store.lock().await.query_anomalies(&query)
}
