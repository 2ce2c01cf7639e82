//! Error types for vigil payloads.

use thiserror::Error;

/// Errors that can occur encoding or decoding scenario payloads.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// JSON serialization failed
    #[error("payload encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON deserialization failed
    #[error("payload decoding failed: {0}")]
    Decode(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PayloadError>();
    }
}
