//! Main store implementation.

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{Budget, NewAnomaly, StoredAnomaly, StoredReading};
use crate::queries::{AnomalyQuery, ReadingQuery};
use crate::schema;

/// SQLite-based store for deepwatt telemetry.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

fn unix_to_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let secs: i64 = row.get(idx)?;
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<StoredReading> {
    Ok(StoredReading {
        id: row.get(0)?,
        device_id: row.get(1)?,
        rms_current: row.get(2)?,
        power: row.get(3)?,
        daily_energy: row.get(4)?,
        timestamp: row.get(5)?,
        received_at: unix_to_datetime(row, 6)?,
    })
}

// Reading operations
impl Store {
    /// Append a reading. Returns the new row ID.
    ///
    /// The stored timestamp is exactly what the device sent, including `0`.
    pub fn insert_reading(&self, reading: &StoredReading) -> Result<i64> {
        if reading.device_id.is_empty() {
            return Err(Error::EmptyDeviceId);
        }

        self.conn.execute(
            "INSERT INTO readings (device_id, rms_current, power, daily_energy, timestamp, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                reading.device_id,
                reading.rms_current,
                reading.power,
                reading.daily_energy,
                reading.timestamp,
                reading.received_at.unix_timestamp(),
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Query readings with filters.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let readings = stmt
            .query_map(params_ref.as_slice(), reading_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(readings)
    }

    /// Most recently inserted reading for a device.
    ///
    /// Insertion order, not device timestamp, decides which reading is latest,
    /// so devices without a clock are handled the same as any other.
    pub fn latest_reading(&self, device_id: &str) -> Result<Option<StoredReading>> {
        let reading = self
            .conn
            .query_row(
                "SELECT id, device_id, rms_current, power, daily_energy, timestamp, received_at
                 FROM readings WHERE device_id = ? ORDER BY id DESC LIMIT 1",
                [device_id],
                reading_from_row,
            )
            .optional()?;

        Ok(reading)
    }

    /// Count readings, optionally for a single device.
    pub fn count_readings(&self, device_id: Option<&str>) -> Result<u64> {
        let count: i64 = match device_id {
            Some(id) => self.conn.query_row(
                "SELECT COUNT(*) FROM readings WHERE device_id = ?",
                [id],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }
}

// Budget operations
impl Store {
    /// Get the budget for a monitoring device.
    pub fn get_budget(&self, monitoring_device_id: &str) -> Result<Option<Budget>> {
        let budget = self
            .conn
            .query_row(
                "SELECT monitoring_device_id, feedback_device_id, threshold
                 FROM budgets WHERE monitoring_device_id = ?",
                [monitoring_device_id],
                |row| {
                    Ok(Budget {
                        monitoring_device_id: row.get(0)?,
                        feedback_device_id: row.get(1)?,
                        threshold: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(budget)
    }

    /// Create the budget or replace both mutable fields of an existing one.
    pub fn upsert_budget(&self, budget: &Budget) -> Result<()> {
        if budget.monitoring_device_id.is_empty() {
            return Err(Error::EmptyDeviceId);
        }

        self.conn.execute(
            "INSERT INTO budgets (monitoring_device_id, feedback_device_id, threshold)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(monitoring_device_id) DO UPDATE SET
                feedback_device_id = excluded.feedback_device_id,
                threshold = excluded.threshold",
            rusqlite::params![
                budget.monitoring_device_id,
                budget.feedback_device_id,
                budget.threshold,
            ],
        )?;

        debug!(
            "Saved budget for {}: {} -> {}",
            budget.monitoring_device_id, budget.threshold, budget.feedback_device_id
        );

        Ok(())
    }

    /// List all budgets ordered by monitoring device.
    pub fn list_budgets(&self) -> Result<Vec<Budget>> {
        let mut stmt = self.conn.prepare(
            "SELECT monitoring_device_id, feedback_device_id, threshold
             FROM budgets ORDER BY monitoring_device_id",
        )?;

        let budgets = stmt
            .query_map([], |row| {
                Ok(Budget {
                    monitoring_device_id: row.get(0)?,
                    feedback_device_id: row.get(1)?,
                    threshold: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(budgets)
    }

    /// Number of configured budgets.
    pub fn count_budgets(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM budgets", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

// Anomaly operations
impl Store {
    /// Record an anomaly. Returns the new row ID.
    pub fn insert_anomaly(&self, anomaly: &NewAnomaly) -> Result<i64> {
        if anomaly.device_id.is_empty() {
            return Err(Error::EmptyDeviceId);
        }

        self.conn.execute(
            "INSERT INTO anomalies (device_reading_id, device_id, rms_current, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                anomaly.device_reading_id,
                anomaly.device_id,
                anomaly.rms_current,
                anomaly.timestamp,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Query anomalies with filters, oldest first.
    pub fn query_anomalies(&self, query: &AnomalyQuery) -> Result<Vec<StoredAnomaly>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let anomalies = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok(StoredAnomaly {
                    id: row.get(0)?,
                    device_reading_id: row.get(1)?,
                    device_id: row.get(2)?,
                    rms_current: row.get(3)?,
                    timestamp: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(anomalies)
    }
}
