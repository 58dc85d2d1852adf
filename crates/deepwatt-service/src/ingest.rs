//! Ingestion pipeline: topic and payload in, persisted reading and cache entry out.
//!
//! The MQTT event loop never touches the store. It hands each publish to
//! [`enqueue`], which pushes onto a bounded channel and drops the message when
//! the channel is full. A single [`run_worker`] task drains the channel in
//! arrival order and calls [`ingest`] for every message.

use std::sync::Arc;

use bytes::Bytes;
use deepwatt_store::StoredReading;
use deepwatt_types::topic::device_id_from_topic;
use deepwatt_types::{ParseError, RealtimeSample, Telemetry};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

/// A publish received from the broker, waiting to be ingested.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Why a message was not ingested.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The topic has no device id under the configured prefix.
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// The payload could not be decoded as telemetry.
    #[error("{0}")]
    MalformedPayload(ParseError),

    /// The reading could not be written. The cache was left untouched.
    #[error("Failed to persist reading: {0}")]
    Persistence(#[from] deepwatt_store::Error),
}

/// Ingest one message.
///
/// Derives the device id from `topic`, decodes `payload`, appends a reading
/// stamped with `received_at` and, only once the write succeeded, replaces
/// the device's realtime cache entry.
pub async fn ingest(
    state: &AppState,
    topic: &str,
    payload: &[u8],
    received_at: OffsetDateTime,
) -> Result<StoredReading, IngestError> {
    let device_id = device_id_from_topic(&state.config.mqtt.topic_prefix, topic)
        .map_err(|_| IngestError::InvalidTopic(topic.to_string()))?;
    let telemetry = Telemetry::from_json(payload).map_err(IngestError::MalformedPayload)?;

    let mut reading = StoredReading::from_telemetry(device_id, &telemetry, received_at);
    {
        let store = state.store.lock().await;
        reading.id = store.insert_reading(&reading)?;
    }

    state
        .cache
        .put(RealtimeSample::new(device_id, &telemetry))
        .await;

    Ok(reading)
}

/// Ingest a queued message, logging and counting the outcome.
pub async fn handle_message(state: &AppState, message: &InboundMessage) {
    let received_at = OffsetDateTime::now_utc();
    match ingest(state, &message.topic, &message.payload, received_at).await {
        Ok(reading) => {
            state.listener.record_ingested();
            debug!(
                device_id = %reading.device_id,
                id = reading.id,
                power = reading.power,
                "Ingested reading"
            );
        }
        Err(e @ (IngestError::InvalidTopic(_) | IngestError::MalformedPayload(_))) => {
            state.listener.record_malformed();
            warn!(topic = %message.topic, error = %e, "Dropping message");
        }
        Err(e @ IngestError::Persistence(_)) => {
            state.listener.record_persist_failure();
            error!(topic = %message.topic, error = %e, "Dropping message");
        }
    }
}

/// Hand a message to the worker without waiting.
///
/// Returns `false` if the message was dropped because the queue is full or
/// the worker has gone away.
pub fn enqueue(
    state: &AppState,
    tx: &mpsc::Sender<InboundMessage>,
    message: InboundMessage,
) -> bool {
    state.listener.record_received();
    match tx.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(message)) => {
            state.listener.record_dropped();
            warn!(topic = %message.topic, "Ingestion queue full, dropping message");
            false
        }
        Err(TrySendError::Closed(message)) => {
            state.listener.record_dropped();
            warn!(topic = %message.topic, "Ingestion worker stopped, dropping message");
            false
        }
    }
}

/// Drain `rx` until it closes or the stop signal fires.
pub async fn run_worker(state: Arc<AppState>, mut rx: mpsc::Receiver<InboundMessage>) {
    let mut stop_rx = state.listener.subscribe_stop();
    info!("Ingestion worker started");

    loop {
        tokio::select! {
            message = rx.recv() => {
                match message {
                    Some(message) => handle_message(&state, &message).await,
                    None => {
                        debug!("Ingestion queue closed");
                        break;
                    }
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    info!("Ingestion worker received stop signal");
                    break;
                }
            }
        }
    }

    info!("Ingestion worker stopped");
}
