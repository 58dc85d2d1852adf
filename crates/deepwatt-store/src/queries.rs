//! Query builders for readings and anomalies.
//!
//! Time bounds are Unix seconds and inclusive on both ends. Results come back
//! in ascending timestamp order unless [`ReadingQuery::newest_first`] is set;
//! rows sharing a timestamp are ordered by insertion.
//!
//! # Example
//!
//! ```
//! use deepwatt_store::{AnomalyQuery, ReadingQuery, Store};
//!
//! let store = Store::open_in_memory()?;
//!
//! let query = ReadingQuery::new()
//!     .device("dev1")
//!     .since(1_700_000_000)
//!     .until(1_700_086_400);
//! let readings = store.query_readings(&query)?;
//!
//! let anomalies = store.query_anomalies(&AnomalyQuery::new().device("dev1"))?;
//! # Ok::<(), deepwatt_store::Error>(())
//! ```

/// Fluent query builder for stored readings.
#[derive(Debug, Default, Clone)]
pub struct ReadingQuery {
    /// Filter by device ID.
    pub device_id: Option<String>,
    /// Lower bound on the device timestamp.
    pub since: Option<i64>,
    /// Upper bound on the device timestamp.
    pub until: Option<i64>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Order by timestamp descending.
    pub newest_first: bool,
}

impl ReadingQuery {
    /// Create a query over all readings, oldest first.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by device ID.
    pub fn device(mut self, device_id: &str) -> Self {
        self.device_id = Some(device_id.to_string());
        self
    }

    /// Only readings with `timestamp >= since`.
    pub fn since(mut self, since: i64) -> Self {
        self.since = Some(since);
        self
    }

    /// Only readings with `timestamp <= until`.
    pub fn until(mut self, until: i64) -> Self {
        self.until = Some(until);
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Order results newest first.
    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        build_where(self.device_id.as_deref(), self.since, self.until)
    }

    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, device_id, rms_current, power, daily_energy, timestamp, received_at \
             FROM readings {} ORDER BY timestamp {order}, id {order}",
            where_clause
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        sql
    }
}

/// Fluent query builder for anomalies.
#[derive(Debug, Default, Clone)]
pub struct AnomalyQuery {
    /// Filter by device ID.
    pub device_id: Option<String>,
    /// Lower bound on the anomaly timestamp.
    pub since: Option<i64>,
    /// Upper bound on the anomaly timestamp.
    pub until: Option<i64>,
    /// Maximum number of results.
    pub limit: Option<u32>,
}

impl AnomalyQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, device_id: &str) -> Self {
        self.device_id = Some(device_id.to_string());
        self
    }

    pub fn since(mut self, since: i64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: i64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        build_where(self.device_id.as_deref(), self.since, self.until)
    }

    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();

        let mut sql = format!(
            "SELECT id, device_reading_id, device_id, rms_current, timestamp \
             FROM anomalies {} ORDER BY timestamp ASC, id ASC",
            where_clause
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        sql
    }
}

fn build_where(
    device_id: Option<&str>,
    since: Option<i64>,
    until: Option<i64>,
) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(device_id) = device_id {
        conditions.push("device_id = ?");
        params.push(Box::new(device_id.to_string()));
    }

    if let Some(since) = since {
        conditions.push("timestamp >= ?");
        params.push(Box::new(since));
    }

    if let Some(until) = until {
        conditions.push("timestamp <= ?");
        params.push(Box::new(until));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    (where_clause, params)
}
