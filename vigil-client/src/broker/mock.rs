//! Mock broker for testing.
//!
//! In-process implementation of the session contract with correct stream,
//! consumer, and key-value semantics. Supports fault injection (operations
//! that fail without or after taking effect) and misbehavior injection
//! (broker bugs the harness is supposed to catch), plus inspection helpers
//! for asserting on what the broker saw.

use super::{
    Broker, BrokerError, BucketConfig, ConnectOptions, ConsumerConfig, Delivery, KvEntry,
    PublishAck, Session, StreamConfig,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use vigil_types::{Revision, SequencePair};

/// Operations that can be targeted by [`MockBroker::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum MockOp {
    Connect,
    CreateStream,
    DeleteStream,
    ListStreams,
    CreateConsumer,
    DeleteConsumer,
    ListConsumers,
    Publish,
    FetchNext,
    Ack,
    CreateBucket,
    DeleteBucket,
    ListBuckets,
    KvCreate,
    KvGet,
    KvUpdate,
}

/// Mock broker for testing.
///
/// Hands out sessions that all share one in-memory state, so concurrent
/// sessions observe each other exactly like clients of a real broker.
/// The mock never deduplicates publishes; [`PublishAck::duplicate`] is
/// always false.
#[derive(Debug, Default)]
pub struct MockBroker {
    shared: Arc<MockShared>,
}

#[derive(Debug, Default)]
struct MockShared {
    state: Mutex<MockState>,
    publish_notify: Notify,
}

#[derive(Debug, Default)]
struct MockState {
    connections: Vec<String>,
    streams: BTreeMap<String, MockStream>,
    buckets: BTreeMap<String, MockBucket>,
    object_stores: BTreeSet<String>,
    fail_next: HashMap<MockOp, u32>,
    drop_delete_ack: BTreeSet<String>,
    skip_sequence: BTreeSet<String>,
    duplicate_delivery: BTreeSet<(String, String)>,
    phantom_streams: BTreeSet<String>,
    lose_kv_update: BTreeSet<(String, String)>,
    conflict_kv_update: BTreeSet<(String, String)>,
}

#[derive(Debug)]
struct MockStream {
    config: StreamConfig,
    last_sequence: u64,
    messages: BTreeMap<u64, Vec<u8>>,
    consumers: BTreeMap<String, MockConsumer>,
}

impl MockStream {
    fn new(config: StreamConfig) -> Self {
        Self {
            config,
            last_sequence: 0,
            messages: BTreeMap::new(),
            consumers: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
struct MockConsumer {
    config: ConsumerConfig,
    next_deliver: u64,
    consumer_sequence: u64,
    acked: BTreeSet<u64>,
}

impl MockConsumer {
    fn new(config: ConsumerConfig) -> Self {
        Self {
            config,
            next_deliver: 1,
            consumer_sequence: 0,
            acked: BTreeSet::new(),
        }
    }
}

#[derive(Debug)]
struct MockBucket {
    config: BucketConfig,
    last_revision: u64,
    entries: BTreeMap<String, MockEntry>,
}

impl MockBucket {
    fn new(config: BucketConfig) -> Self {
        Self {
            config,
            last_revision: 0,
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
struct MockEntry {
    value: Vec<u8>,
    revision: u64,
}

impl MockState {
    fn take_fault(&mut self, op: MockOp) -> Result<(), BrokerError> {
        if let Some(remaining) = self.fail_next.get_mut(&op) {
            *remaining -= 1;
            if *remaining == 0 {
                self.fail_next.remove(&op);
            }
            return Err(BrokerError::Unavailable(format!("injected outage on {op:?}")));
        }
        Ok(())
    }
}

impl MockBroker {
    /// Create a new mock broker with empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Session sharing this broker's state, without connect bookkeeping.
    ///
    /// Tests that don't care about [`ConnectOptions`] use this instead of
    /// going through [`Broker::connect`].
    pub fn session(&self) -> MockSession {
        MockSession {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Addresses passed to [`Broker::connect`], in call order.
    pub fn connections(&self) -> Vec<String> {
        let state = self.shared.state.lock().unwrap();
        state.connections.clone()
    }

    /// Cause the next `count` calls of `op` to fail with an injected
    /// outage, without taking effect.
    pub fn fail_next(&self, op: MockOp, count: u32) {
        let mut state = self.shared.state.lock().unwrap();
        if count > 0 {
            state.fail_next.insert(op, count);
        }
    }

    /// Cause the next `delete_stream` for `stream` to apply server-side
    /// but report an outage, as if the reply was lost.
    pub fn drop_next_delete_ack(&self, stream: &str) {
        let mut state = self.shared.state.lock().unwrap();
        state.drop_delete_ack.insert(stream.to_string());
    }

    /// Misbehavior: the next publish to `stream` burns an extra sequence
    /// number, leaving a gap a sequence verifier must notice.
    pub fn skip_next_stream_sequence(&self, stream: &str) {
        let mut state = self.shared.state.lock().unwrap();
        state.skip_sequence.insert(stream.to_string());
    }

    /// Misbehavior: the next message claimed by `consumer` on `stream` is
    /// delivered again to the following fetch, as if the broker forgot
    /// the delivery.
    pub fn duplicate_next_delivery(&self, stream: &str, consumer: &str) {
        let mut state = self.shared.state.lock().unwrap();
        state
            .duplicate_delivery
            .insert((stream.to_string(), consumer.to_string()));
    }

    /// Misbehavior: `name` appears in stream listings without having been
    /// created.
    pub fn phantom_stream(&self, name: &str) {
        let mut state = self.shared.state.lock().unwrap();
        state.phantom_streams.insert(name.to_string());
    }

    /// Misbehavior: the next conditional update of `key` in `bucket` that
    /// would succeed is acknowledged with an advanced revision but never
    /// applied, as if the broker lost the write after acking it.
    pub fn lose_next_kv_update(&self, bucket: &str, key: &str) {
        let mut state = self.shared.state.lock().unwrap();
        state
            .lose_kv_update
            .insert((bucket.to_string(), key.to_string()));
    }

    /// Misbehavior: the next conditional update of `key` in `bucket` that
    /// would succeed is rejected as a conflict, naming a revision the
    /// bucket does not actually hold.
    pub fn conflict_next_kv_update(&self, bucket: &str, key: &str) {
        let mut state = self.shared.state.lock().unwrap();
        state
            .conflict_kv_update
            .insert((bucket.to_string(), key.to_string()));
    }

    /// Seed an object store name so wipe sweeps have something to delete.
    pub fn seed_object_store(&self, name: &str) {
        let mut state = self.shared.state.lock().unwrap();
        state.object_stores.insert(name.to_string());
    }

    /// Number of messages currently stored in `stream`.
    pub fn message_count(&self, stream: &str) -> Option<usize> {
        let state = self.shared.state.lock().unwrap();
        state.streams.get(stream).map(|s| s.messages.len())
    }

    /// Configuration recorded for a consumer, if it exists.
    pub fn consumer_config(&self, stream: &str, consumer: &str) -> Option<ConsumerConfig> {
        let state = self.shared.state.lock().unwrap();
        state
            .streams
            .get(stream)
            .and_then(|s| s.consumers.get(consumer))
            .map(|c| c.config.clone())
    }

    /// Number of distinct deliveries acked on a consumer.
    pub fn acked_count(&self, stream: &str, consumer: &str) -> Option<usize> {
        let state = self.shared.state.lock().unwrap();
        state
            .streams
            .get(stream)
            .and_then(|s| s.consumers.get(consumer))
            .map(|c| c.acked.len())
    }

    /// Clear all state (streams, buckets, injections, connections).
    pub fn reset(&self) {
        let mut state = self.shared.state.lock().unwrap();
        *state = MockState::default();
    }
}

impl Clone for MockBroker {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Session>, BrokerError> {
        let mut state = self.shared.state.lock().unwrap();
        state.take_fault(MockOp::Connect)?;
        state.connections.push(options.address.clone());
        Ok(Box::new(MockSession {
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// One session against a [`MockBroker`]. Cheap to clone; all clones share
/// the broker state.
#[derive(Debug, Clone)]
pub struct MockSession {
    shared: Arc<MockShared>,
}

impl MockSession {
    fn try_claim(&self, stream: &str, consumer: &str) -> Result<Option<Delivery>, BrokerError> {
        let mut guard = self.shared.state.lock().unwrap();
        let state = &mut *guard;
        state.take_fault(MockOp::FetchNext)?;
        let s = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;
        let c = s
            .consumers
            .get_mut(consumer)
            .ok_or_else(|| BrokerError::ConsumerNotFound(consumer.to_string()))?;
        let next = c.next_deliver;
        let claimed = s.messages.range(next..).next().map(|(k, v)| (*k, v.clone()));
        let Some((msg_seq, payload)) = claimed else {
            return Ok(None);
        };
        let repeat = state
            .duplicate_delivery
            .remove(&(stream.to_string(), consumer.to_string()));
        c.consumer_sequence += 1;
        if !repeat {
            c.next_deliver = msg_seq + 1;
        }
        Ok(Some(Delivery {
            stream: stream.to_string(),
            consumer: consumer.to_string(),
            payload,
            sequence: SequencePair::new(msg_seq, c.consumer_sequence),
        }))
    }
}

#[async_trait]
impl Session for MockSession {
    async fn create_stream(&self, config: &StreamConfig) -> Result<(), BrokerError> {
        let mut state = self.shared.state.lock().unwrap();
        state.take_fault(MockOp::CreateStream)?;
        if let Some(existing) = state.streams.get(&config.name) {
            if existing.config == *config {
                return Ok(());
            }
            return Err(BrokerError::StreamExists(config.name.clone()));
        }
        state
            .streams
            .insert(config.name.clone(), MockStream::new(config.clone()));
        Ok(())
    }

    async fn delete_stream(&self, stream: &str) -> Result<(), BrokerError> {
        let mut state = self.shared.state.lock().unwrap();
        state.take_fault(MockOp::DeleteStream)?;
        if state.streams.remove(stream).is_none() {
            return Err(BrokerError::StreamNotFound(stream.to_string()));
        }
        if state.drop_delete_ack.remove(stream) {
            return Err(BrokerError::Unavailable(format!(
                "delete reply lost for {stream}"
            )));
        }
        Ok(())
    }

    async fn list_streams(&self) -> Result<Vec<String>, BrokerError> {
        let mut state = self.shared.state.lock().unwrap();
        state.take_fault(MockOp::ListStreams)?;
        let mut names: Vec<String> = state.streams.keys().cloned().collect();
        names.extend(state.phantom_streams.iter().cloned());
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn create_consumer(
        &self,
        stream: &str,
        config: &ConsumerConfig,
    ) -> Result<(), BrokerError> {
        let mut state = self.shared.state.lock().unwrap();
        state.take_fault(MockOp::CreateConsumer)?;
        let s = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;
        // Re-creating an existing durable re-attaches without resetting
        // its cursor.
        s.consumers
            .entry(config.name.clone())
            .or_insert_with(|| MockConsumer::new(config.clone()));
        Ok(())
    }

    async fn delete_consumer(&self, stream: &str, consumer: &str) -> Result<(), BrokerError> {
        let mut state = self.shared.state.lock().unwrap();
        state.take_fault(MockOp::DeleteConsumer)?;
        let s = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;
        if s.consumers.remove(consumer).is_none() {
            return Err(BrokerError::ConsumerNotFound(consumer.to_string()));
        }
        Ok(())
    }

    async fn list_consumers(&self, stream: &str) -> Result<Vec<String>, BrokerError> {
        let mut state = self.shared.state.lock().unwrap();
        state.take_fault(MockOp::ListConsumers)?;
        let s = state
            .streams
            .get(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;
        Ok(s.consumers.keys().cloned().collect())
    }

    async fn publish(&self, stream: &str, payload: &[u8]) -> Result<PublishAck, BrokerError> {
        let sequence = {
            let mut guard = self.shared.state.lock().unwrap();
            let state = &mut *guard;
            state.take_fault(MockOp::Publish)?;
            let skip = state.skip_sequence.remove(stream);
            let s = state
                .streams
                .get_mut(stream)
                .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;
            s.last_sequence += if skip { 2 } else { 1 };
            s.messages.insert(s.last_sequence, payload.to_vec());
            s.last_sequence
        };
        self.shared.publish_notify.notify_waiters();
        Ok(PublishAck {
            sequence,
            duplicate: false,
        })
    }

    async fn fetch_next(
        &self,
        stream: &str,
        consumer: &str,
        wait: Duration,
    ) -> Result<Delivery, BrokerError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.shared.publish_notify.notified();
            tokio::pin!(notified);
            // Register interest before checking so a publish between the
            // check and the await cannot be missed.
            notified.as_mut().enable();
            if let Some(delivery) = self.try_claim(stream, consumer)? {
                return Ok(delivery);
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(BrokerError::NoMessage(wait));
                }
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut state = self.shared.state.lock().unwrap();
        state.take_fault(MockOp::Ack)?;
        let s = state
            .streams
            .get_mut(&delivery.stream)
            .ok_or_else(|| BrokerError::StreamNotFound(delivery.stream.clone()))?;
        let c = s
            .consumers
            .get_mut(&delivery.consumer)
            .ok_or_else(|| BrokerError::ConsumerNotFound(delivery.consumer.clone()))?;
        c.acked.insert(delivery.sequence.consumer_sequence);
        Ok(())
    }

    async fn create_bucket(&self, config: &BucketConfig) -> Result<(), BrokerError> {
        let mut state = self.shared.state.lock().unwrap();
        state.take_fault(MockOp::CreateBucket)?;
        if let Some(existing) = state.buckets.get(&config.name) {
            if existing.config == *config {
                return Ok(());
            }
            return Err(BrokerError::StreamExists(config.name.clone()));
        }
        state
            .buckets
            .insert(config.name.clone(), MockBucket::new(config.clone()));
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), BrokerError> {
        let mut state = self.shared.state.lock().unwrap();
        state.take_fault(MockOp::DeleteBucket)?;
        if state.buckets.remove(bucket).is_none() {
            return Err(BrokerError::BucketNotFound(bucket.to_string()));
        }
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>, BrokerError> {
        let mut state = self.shared.state.lock().unwrap();
        state.take_fault(MockOp::ListBuckets)?;
        Ok(state.buckets.keys().cloned().collect())
    }

    async fn kv_create(
        &self,
        bucket: &str,
        key: &str,
        value: &[u8],
    ) -> Result<Revision, BrokerError> {
        let mut state = self.shared.state.lock().unwrap();
        state.take_fault(MockOp::KvCreate)?;
        let b = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| BrokerError::BucketNotFound(bucket.to_string()))?;
        if b.entries.contains_key(key) {
            return Err(BrokerError::KeyExists(key.to_string()));
        }
        b.last_revision += 1;
        b.entries.insert(
            key.to_string(),
            MockEntry {
                value: value.to_vec(),
                revision: b.last_revision,
            },
        );
        Ok(Revision::new(b.last_revision))
    }

    async fn kv_get(&self, bucket: &str, key: &str) -> Result<KvEntry, BrokerError> {
        let mut state = self.shared.state.lock().unwrap();
        state.take_fault(MockOp::KvGet)?;
        let b = state
            .buckets
            .get(bucket)
            .ok_or_else(|| BrokerError::BucketNotFound(bucket.to_string()))?;
        let e = b
            .entries
            .get(key)
            .ok_or_else(|| BrokerError::KeyNotFound(key.to_string()))?;
        Ok(KvEntry {
            value: e.value.clone(),
            revision: Revision::new(e.revision),
        })
    }

    async fn kv_update(
        &self,
        bucket: &str,
        key: &str,
        value: &[u8],
        expected: Revision,
    ) -> Result<Revision, BrokerError> {
        let mut guard = self.shared.state.lock().unwrap();
        let state = &mut *guard;
        state.take_fault(MockOp::KvUpdate)?;
        let b = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| BrokerError::BucketNotFound(bucket.to_string()))?;
        let e = b
            .entries
            .get_mut(key)
            .ok_or_else(|| BrokerError::KeyNotFound(key.to_string()))?;
        if e.revision != expected.value() {
            return Err(BrokerError::Conflict {
                key: key.to_string(),
                expected,
                current: Revision::new(e.revision),
            });
        }
        if state
            .conflict_kv_update
            .remove(&(bucket.to_string(), key.to_string()))
        {
            return Err(BrokerError::Conflict {
                key: key.to_string(),
                expected,
                current: Revision::new(e.revision + 1),
            });
        }
        if state
            .lose_kv_update
            .remove(&(bucket.to_string(), key.to_string()))
        {
            return Ok(Revision::new(b.last_revision + 1));
        }
        b.last_revision += 1;
        e.revision = b.last_revision;
        e.value = value.to_vec();
        Ok(Revision::new(e.revision))
    }

    async fn list_object_stores(&self) -> Result<Vec<String>, BrokerError> {
        let state = self.shared.state.lock().unwrap();
        Ok(state.object_stores.iter().cloned().collect())
    }

    async fn delete_object_store(&self, store: &str) -> Result<(), BrokerError> {
        let mut state = self.shared.state.lock().unwrap();
        if !state.object_stores.remove(store) {
            return Err(BrokerError::BucketNotFound(store.to_string()));
        }
        Ok(())
    }
}
