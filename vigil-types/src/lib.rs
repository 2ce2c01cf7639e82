//! # vigil-types
//!
//! Shared types for the vigil broker verification harness.
//!
//! This crate provides the foundational types used across all vigil crates:
//! - [`SequencePair`], [`Revision`], [`WorkerId`] - Ordering and identity types
//! - [`RoundMessage`], [`GroupMessage`], [`CounterValue`], [`CellValue`] - Scenario payloads
//! - [`Payload`] - Encode/decode contract for payloads crossing the broker
//! - [`PayloadError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod payloads;

pub use error::PayloadError;
pub use ids::{Revision, SequencePair, WorkerId};
pub use payloads::{CellValue, CounterValue, GroupMessage, Payload, RoundMessage};
