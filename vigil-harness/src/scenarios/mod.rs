//! Built-in verification scenarios.
//!
//! Five workloads, each probing one slice of broker behavior:
//!
//! - [`DurableSequence`]: publish/fetch/ack rounds through a durable
//!   consumer, verifying sequence continuity end to end
//! - [`CasContention`]: many writers racing a counter upward through
//!   conditional updates, verifying nothing is lost or double-counted
//! - [`QueueGroup`]: one publisher against competing subscribers sharing
//!   a consumer, verifying each message lands exactly once
//! - [`StreamChurn`]: random create/delete churn against the stream
//!   catalog, verifying listings against a local oracle
//! - [`KvCells`]: round-robin rewrites of a few cells, verifying
//!   revisions climb and reads return what was written

mod cas;
mod cells;
mod churn;
mod queue_group;
mod sequence;

pub use cas::CasContention;
pub use cells::KvCells;
pub use churn::StreamChurn;
pub use queue_group::QueueGroup;
pub use sequence::DurableSequence;
