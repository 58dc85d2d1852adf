//! Error types for payload and topic parsing.

use thiserror::Error;

/// Errors that can occur while decoding inbound telemetry.
///
/// This enum is marked `#[non_exhaustive]` so new decode failures can be
/// added without breaking downstream matches.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The payload is not a valid telemetry JSON object.
    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// The topic does not carry a device identifier under the expected prefix.
    #[error("Invalid topic '{topic}': expected '{prefix}/<device_id>'")]
    InvalidTopic { topic: String, prefix: String },
}

/// Result type alias using deepwatt-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
