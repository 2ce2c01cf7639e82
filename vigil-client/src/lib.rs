//! # vigil-client
//!
//! Broker session contract for the vigil verification harness.
//!
//! The harness never speaks a wire protocol itself; every scenario reaches
//! the service under test through the [`Broker`] and [`Session`] traits in
//! this crate. An adapter over a real broker client implements the traits
//! in the embedding project; the built-in [`MockBroker`] implements them
//! in-process with correct stream, consumer, and key-value semantics plus
//! fault injection, and backs both the test suites and the CLI's `--mock`
//! mode.
//!
//! ## Example
//!
//! ```ignore
//! use vigil_client::{Broker, ConnectOptions, MockBroker};
//!
//! let broker = MockBroker::new();
//! let session = broker.connect(&ConnectOptions::new("mock://local")).await?;
//! session.create_stream(&StreamConfig::new("events").with_replicas(3)).await?;
//! let ack = session.publish("events", b"payload").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broker;

pub use broker::{
    Broker, BrokerError, BucketConfig, ConnectOptions, ConsumerConfig, Delivery, KvEntry,
    MockBroker, MockOp, MockSession, PublishAck, ReconnectPolicy, Session, StreamConfig,
};
