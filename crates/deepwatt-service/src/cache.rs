//! Latest-sample cache gated by freshness.
//!
//! Holds one [`RealtimeSample`] per device. Writes overwrite unconditionally;
//! entries are never evicted. Whether a sample may be served is decided at
//! read time by [`deepwatt_types::is_fresh`] against the device-reported
//! timestamp, so a stale entry and a missing entry look the same to callers.

use std::collections::HashMap;

use deepwatt_types::{RealtimeSample, is_fresh};
use tokio::sync::RwLock;

/// Concurrent map from device ID to its most recent sample.
pub struct RealtimeCache {
    samples: RwLock<HashMap<String, RealtimeSample>>,
    ttl_secs: i64,
}

impl RealtimeCache {
    /// Create an empty cache serving samples up to `ttl_secs` old.
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            samples: RwLock::new(HashMap::new()),
            ttl_secs,
        }
    }

    /// Freshness window in seconds.
    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// Replace the entry for the sample's device.
    pub async fn put(&self, sample: RealtimeSample) {
        let mut samples = self.samples.write().await;
        samples.insert(sample.device_id.clone(), sample);
    }

    /// The sample for `device_id` if it exists and is fresh at `now`.
    pub async fn get(&self, device_id: &str, now: i64) -> Option<RealtimeSample> {
        let samples = self.samples.read().await;
        samples
            .get(device_id)
            .filter(|sample| is_fresh(now, sample.timestamp, self.ttl_secs))
            .cloned()
    }

    /// Number of devices with an entry, fresh or not.
    pub async fn len(&self) -> usize {
        self.samples.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.samples.read().await.is_empty()
    }
}

impl Default for RealtimeCache {
    fn default() -> Self {
        Self::new(deepwatt_types::DEFAULT_TTL_SECS)
    }
}
