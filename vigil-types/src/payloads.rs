//! Scenario payloads carried through the broker.
//!
//! The broker treats payload bytes as opaque; these are the records the
//! scenario drivers publish and read back to check for loss, reordering,
//! and stale reads. Everything crosses the wire as JSON so dumps stay
//! greppable during incident review.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::PayloadError;

/// Encode/decode contract for payloads crossing the broker.
///
/// Decoding foreign or truncated bytes is an error, never a panic; the
/// drivers treat a decode failure as evidence of payload corruption.
pub trait Payload: Serialize + DeserializeOwned + Sized {
    /// Serialize to JSON bytes.
    fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        serde_json::to_vec(self).map_err(PayloadError::Encode)
    }

    /// Deserialize from JSON bytes.
    fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        serde_json::from_slice(bytes).map_err(PayloadError::Decode)
    }
}

/// One round of the sequence consistency verifier.
///
/// Published, consumed, and checked against the driver's own round
/// counter before the acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundMessage {
    /// Driver-side round counter, starting at 1.
    pub round: u64,
}

impl Payload for RoundMessage {}

/// One message published into a delivery group.
///
/// The publisher stamps its own counter; whichever group member consumes
/// the message reports the stamp back so the publisher can detect a
/// duplicate or missed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    /// Publisher-side counter, starting at 1.
    pub sequence: u64,
}

impl Payload for GroupMessage {}

/// Contents of the contended counter cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterValue {
    /// Last writer to successfully advance the counter.
    pub owner: String,
    /// Current counter value.
    pub value: u64,
}

impl Payload for CounterValue {}

/// Contents of one key in the cell round-robin verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellValue {
    /// Round in which this value was written. 0 for the initial write.
    pub round: u64,
    /// Opaque fill, regenerated every write.
    pub data: Vec<u8>,
}

impl Payload for CellValue {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_message_roundtrip() {
        let msg = RoundMessage { round: 42 };
        let bytes = msg.encode().unwrap();
        assert_eq!(RoundMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn group_message_roundtrip() {
        let msg = GroupMessage { sequence: 7 };
        let bytes = msg.encode().unwrap();
        assert_eq!(GroupMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn counter_value_roundtrip() {
        let cell = CounterValue {
            owner: "worker-12".to_string(),
            value: 9_999,
        };
        let bytes = cell.encode().unwrap();
        assert_eq!(CounterValue::decode(&bytes).unwrap(), cell);
    }

    #[test]
    fn cell_value_roundtrip() {
        let cell = CellValue {
            round: 3,
            data: vec![0xAB; 512],
        };
        let bytes = cell.encode().unwrap();
        assert_eq!(CellValue::decode(&bytes).unwrap(), cell);
    }

    #[test]
    fn decode_garbage_is_error_not_panic() {
        assert!(RoundMessage::decode(b"not json at all").is_err());
        assert!(CounterValue::decode(&[0xFF, 0x00, 0x12]).is_err());
    }

    #[test]
    fn decode_wrong_shape_is_error() {
        let bytes = GroupMessage { sequence: 1 }.encode().unwrap();
        assert!(CounterValue::decode(&bytes).is_err());
    }
}
