//! MQTT topic layout.
//!
//! Devices publish to `{prefix}/{device_id}`. The service subscribes to the
//! wildcard `{prefix}/#` and recovers the device id by stripping the prefix.

use crate::error::{ParseError, ParseResult};

/// The subscription filter covering every device under `prefix`.
///
/// ```
/// assert_eq!(deepwatt_types::topic::subscription_filter("deepwatt"), "deepwatt/#");
/// ```
pub fn subscription_filter(prefix: &str) -> String {
    format!("{}/#", prefix)
}

/// Extract the device identifier from a telemetry topic.
///
/// Everything after `{prefix}/` is the device id, including any further
/// `/` separators. An empty remainder is rejected.
///
/// ```
/// use deepwatt_types::topic::device_id_from_topic;
///
/// assert_eq!(device_id_from_topic("deepwatt", "deepwatt/dev1").unwrap(), "dev1");
/// assert!(device_id_from_topic("deepwatt", "budget/dev1").is_err());
/// ```
pub fn device_id_from_topic<'a>(prefix: &str, topic: &'a str) -> ParseResult<&'a str> {
    let invalid = || ParseError::InvalidTopic {
        topic: topic.to_string(),
        prefix: prefix.to_string(),
    };

    let device_id = topic
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(invalid)?;

    if device_id.is_empty() {
        return Err(invalid());
    }

    Ok(device_id)
}
