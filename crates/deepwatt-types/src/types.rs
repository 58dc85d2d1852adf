//! Core types for deepwatt telemetry.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ParseResult;

/// A telemetry record as published by a metering device.
///
/// The wire format is a JSON object:
///
/// ```json
/// {"rms_current": 1.2, "power": 276.0, "dailyEnergy": 3.4, "timestamp": 1700000000}
/// ```
///
/// Every field is optional on the wire. A missing field or an explicit
/// `null` decodes as zero. Devices without a real-time clock omit
/// `timestamp` or send `0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    /// RMS current in amperes.
    #[serde(deserialize_with = "null_as_zero")]
    pub rms_current: f64,
    /// Instantaneous power in watts.
    #[serde(deserialize_with = "null_as_zero")]
    pub power: f64,
    /// Energy accumulated since local midnight, in kWh.
    #[serde(
        rename = "dailyEnergy",
        alias = "daily_energy",
        deserialize_with = "null_as_zero"
    )]
    pub daily_energy: f64,
    /// Device-reported Unix timestamp in seconds (0 when unknown).
    #[serde(deserialize_with = "null_as_zero")]
    pub timestamp: i64,
}

fn null_as_zero<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Telemetry {
    /// Decode a telemetry payload from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MalformedPayload`](crate::ParseError::MalformedPayload)
    /// if the bytes are not valid JSON or a field has the wrong type.
    pub fn from_json(payload: &[u8]) -> ParseResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// The most recent sample seen for a device.
///
/// Kept in memory only. A new ingestion for the same device replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeSample {
    /// Device identifier derived from the topic.
    pub device_id: String,
    /// RMS current in amperes.
    pub rms_current: f64,
    /// Instantaneous power in watts.
    pub power: f64,
    /// Energy accumulated since local midnight, in kWh.
    #[serde(rename = "dailyEnergy")]
    pub daily_energy: f64,
    /// Device-reported Unix timestamp in seconds.
    pub timestamp: i64,
}

impl RealtimeSample {
    /// Build a sample for `device_id` from decoded telemetry.
    pub fn new(device_id: &str, telemetry: &Telemetry) -> Self {
        Self {
            device_id: device_id.to_string(),
            rms_current: telemetry.rms_current,
            power: telemetry.power,
            daily_energy: telemetry.daily_energy,
            timestamp: telemetry.timestamp,
        }
    }
}
