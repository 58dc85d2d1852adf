//! MQTT telemetry ingestion and HTTP query API for deepwatt power monitors.
//!
//! This crate provides a service that:
//! - Subscribes to `{topic_prefix}/#` on an MQTT broker
//! - Persists every decoded telemetry message as a reading
//! - Keeps the latest sample per device in a freshness-gated cache
//! - Answers time-windowed queries for readings and anomalies
//! - Stores per-device energy budgets and optionally publishes usage feedback
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Listener state and ingestion counters
//! - `GET /realtime/{device_id}` - Latest sample, if fresh
//! - `GET /data/{device_id}?startTime=&endTime=` - Readings in a window
//! - `GET /anomalies/{device_id}?startTime=&endTime=` - Anomalies in a window
//! - `GET /budget/{monitoring_device_id}` - Budget for a device
//! - `POST /update-budget/{monitoring_device_id}` - Create or replace a budget
//!
//! Window bounds are Unix seconds. When either bound is missing, zero or not
//! a number, the trailing 24 hours are used.
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/deepwatt/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:5501"
//!
//! [mqtt]
//! broker = "mqtt://localhost:1883"
//! topic_prefix = "deepwatt"
//!
//! [realtime]
//! ttl = 10
//! ```
//!
//! `BROKER_ADDRESS`, `BROKER_PORT`, `MOSQUITTO_USER` and `MOSQUITTO_PASS`
//! override the broker settings from the file.

pub mod api;
pub mod cache;
pub mod config;
pub mod feedback;
pub mod history;
pub mod ingest;
pub mod listener;
pub mod state;

pub use cache::RealtimeCache;
pub use config::{
    Config, ConfigError, FeedbackConfig, MqttConfig, RealtimeConfig, ServerConfig, StorageConfig,
};
pub use feedback::{FeedbackPublisher, FeedbackSink};
pub use ingest::{InboundMessage, IngestError, ingest, run_worker};
pub use listener::{Listener, ListenerError};
pub use state::{AppState, ConnectionState, ListenerStats};
