//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use deepwatt_types::Telemetry;

/// A reading stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Database row ID.
    #[serde(skip_serializing, default)]
    pub id: i64,
    /// Device identifier.
    pub device_id: String,
    /// RMS current in amperes.
    pub rms_current: f64,
    /// Instantaneous power in watts.
    pub power: f64,
    /// Energy accumulated since local midnight, in kWh.
    #[serde(rename = "dailyEnergy")]
    pub daily_energy: f64,
    /// Device-reported Unix timestamp in seconds (0 when the device has no clock).
    pub timestamp: i64,
    /// When the service processed the message.
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

impl StoredReading {
    /// Create a StoredReading from decoded telemetry.
    pub fn from_telemetry(
        device_id: &str,
        telemetry: &Telemetry,
        received_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: 0, // Will be set by database
            device_id: device_id.to_string(),
            rms_current: telemetry.rms_current,
            power: telemetry.power,
            daily_energy: telemetry.daily_energy,
            timestamp: telemetry.timestamp,
            received_at,
        }
    }

    /// Replace a missing device timestamp with the ingestion time.
    ///
    /// Devices without a clock report `0`; for display the reading is then
    /// placed at the second it was received.
    pub fn normalized(mut self) -> Self {
        if self.timestamp == 0 {
            self.timestamp = self.received_at.unix_timestamp();
        }
        self
    }
}

/// Energy budget for a monitoring device.
///
/// The feedback device is the one that receives usage updates for this budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    /// Device whose consumption is measured. Unique.
    pub monitoring_device_id: String,
    /// Device that is told how much of the budget has been used.
    pub feedback_device_id: String,
    /// Daily energy budget, in the same unit as `dailyEnergy`.
    pub threshold: f64,
}

impl Budget {
    /// Share of the budget consumed by `daily_energy`, in percent.
    ///
    /// Returns `None` when the threshold is zero or negative.
    pub fn usage_percentage(&self, daily_energy: f64) -> Option<f64> {
        (self.threshold > 0.0).then(|| daily_energy / self.threshold * 100.0)
    }
}

/// An anomaly stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAnomaly {
    /// Database row ID.
    pub id: i64,
    /// Reading that triggered the anomaly, if known.
    pub device_reading_id: Option<i64>,
    /// Device identifier.
    pub device_id: String,
    /// RMS current of the flagged reading.
    pub rms_current: f64,
    /// Unix timestamp of the flagged reading.
    pub timestamp: i64,
}

/// An anomaly to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnomaly {
    pub device_reading_id: Option<i64>,
    pub device_id: String,
    pub rms_current: f64,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn reading(timestamp: i64) -> StoredReading {
        StoredReading {
            id: 7,
            device_id: "dev1".to_string(),
            rms_current: 1.2,
            power: 276.0,
            daily_energy: 3.4,
            timestamp,
            received_at: datetime!(2023-11-14 22:13:20 UTC),
        }
    }

    #[test]
    fn test_normalized_replaces_zero_timestamp() {
        let normalized = reading(0).normalized();
        assert_eq!(normalized.timestamp, 1_700_000_000);
    }

    #[test]
    fn test_normalized_keeps_device_timestamp() {
        let normalized = reading(1_600_000_000).normalized();
        assert_eq!(normalized.timestamp, 1_600_000_000);
    }

    #[test]
    fn test_reading_json_shape() {
        let json = serde_json::to_value(reading(1_700_000_000)).unwrap();
        assert_eq!(json["device_id"], "dev1");
        assert_eq!(json["dailyEnergy"], 3.4);
        assert_eq!(json["received_at"], "2023-11-14T22:13:20Z");
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_budget_usage_percentage() {
        let budget = Budget {
            monitoring_device_id: "dev1".to_string(),
            feedback_device_id: "fb1".to_string(),
            threshold: 8.0,
        };
        assert_eq!(budget.usage_percentage(2.0), Some(25.0));
        assert_eq!(budget.usage_percentage(12.0), Some(150.0));
    }

    #[test]
    fn test_budget_usage_percentage_zero_threshold() {
        let budget = Budget {
            monitoring_device_id: "dev1".to_string(),
            feedback_device_id: "fb1".to_string(),
            threshold: 0.0,
        };
        assert_eq!(budget.usage_percentage(2.0), None);
    }
}
