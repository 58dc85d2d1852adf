//! SQLite persistence for deepwatt telemetry.
//!
//! This crate stores three kinds of data:
//!
//! - **Readings**: one append-only row per ingested telemetry message
//! - **Budgets**: per-device energy thresholds, keyed by monitoring device
//! - **Anomalies**: flagged readings written by an external analyzer
//!
//! The schema is versioned and applied once when the store is opened.
//!
//! # Example
//!
//! ```no_run
//! use deepwatt_store::{Store, ReadingQuery};
//!
//! let store = Store::open_default()?;
//!
//! let query = ReadingQuery::new()
//!     .device("dev1")
//!     .since(1_700_000_000)
//!     .until(1_700_086_400);
//! let readings = store.query_readings(&query)?;
//! # Ok::<(), deepwatt_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{Budget, NewAnomaly, StoredAnomaly, StoredReading};
pub use queries::{AnomalyQuery, ReadingQuery};
pub use schema::SCHEMA_VERSION;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/deepwatt/deepwatt.db`
/// - macOS: `~/Library/Application Support/deepwatt/deepwatt.db`
/// - Windows: `C:\Users\<user>\AppData\Local\deepwatt\deepwatt.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("deepwatt")
        .join("deepwatt.db")
}
