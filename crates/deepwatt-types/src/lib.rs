//! Shared telemetry types for the deepwatt ingestion service.
//!
//! This crate holds the pieces that both the store and the service need
//! without pulling in a database or a network stack:
//!
//! - [`Telemetry`], the JSON payload published by metering devices
//! - [`RealtimeSample`], the latest value kept per device in memory
//! - [`TimeWindow`], the inclusive query window with its 24 hour default
//! - [`is_fresh`], the single freshness predicate for cached samples
//! - [`topic`], helpers for the `deepwatt/<device_id>` topic layout
//!
//! # Example
//!
//! ```
//! use deepwatt_types::{Telemetry, RealtimeSample, is_fresh, DEFAULT_TTL_SECS};
//!
//! let payload = br#"{"rms_current":1.2,"power":276.0,"dailyEnergy":3.4,"timestamp":1700000000}"#;
//! let telemetry = Telemetry::from_json(payload)?;
//! let sample = RealtimeSample::new("dev1", &telemetry);
//!
//! assert!(is_fresh(1_700_000_005, sample.timestamp, DEFAULT_TTL_SECS));
//! assert!(!is_fresh(1_700_000_011, sample.timestamp, DEFAULT_TTL_SECS));
//! # Ok::<(), deepwatt_types::ParseError>(())
//! ```

pub mod error;
pub mod freshness;
pub mod topic;
pub mod types;
pub mod window;

pub use error::{ParseError, ParseResult};
pub use freshness::{DEFAULT_TTL_SECS, is_fresh};
pub use types::{RealtimeSample, Telemetry};
pub use window::{DEFAULT_WINDOW_SECS, TimeWindow};
