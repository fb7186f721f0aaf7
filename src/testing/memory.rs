//! In-memory broker and clients.
//!
//! Topics are created on first use with the broker's partition count. Keys
//! are routed with murmur2, the same way Kafka's default partitioner does.
//! Delivery acknowledgments are reported synchronously, from inside `send`.

use crate::{
    config::ClientProperties,
    error::BrokerError,
    stream::{
        ClientFactory, DeliveryCallback, DeliveryFailure, DeliveryMetadata, LogConsumer,
        LogProducer, PartitionCursor, RebalanceListener, Record, TopicPartition,
    },
};

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use murmur2::{KAFKA_SEED, murmur2};
use parking_lot::Mutex;

/// Default maximum number of records returned by a single poll.
pub const DEFAULT_MAX_POLL_RECORDS: usize = 500;

/// Partition a key is routed to.
pub fn partition_for(key: &[u8], partitions: i32) -> i32 {
    let hash = murmur2(key, KAFKA_SEED);
    ((hash & 0x7fffffff) as i32) % partitions
}

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Vec<u8>,
    value: Vec<u8>,
}

#[derive(Debug, Default)]
struct Counters {
    producers_created: AtomicUsize,
    consumers_created: AtomicUsize,
    producers_closed: AtomicUsize,
    consumers_closed: AtomicUsize,
}

#[derive(Debug)]
struct BrokerState {
    partitions: i32,
    topics: Mutex<HashMap<String, Vec<Vec<StoredRecord>>>>,
    unavailable: AtomicBool,
    queue_full: AtomicBool,
    counters: Counters,
}

/// A partitioned, append-only log held in memory.
///
/// Cloning gives another handle to the same broker.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Broker whose topics have a single partition.
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    pub fn with_partitions(partitions: i32) -> Self {
        Self {
            state: Arc::new(BrokerState {
                partitions: partitions.max(1),
                topics: Mutex::new(HashMap::new()),
                unavailable: AtomicBool::new(false),
                queue_full: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    pub fn partitions(&self) -> i32 {
        self.state.partitions
    }

    /// While unavailable, every append is rejected.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.unavailable.store(unavailable, Ordering::Release);
    }

    /// While full, producers refuse to enqueue anything.
    pub fn set_queue_full(&self, full: bool) {
        self.state.queue_full.store(full, Ordering::Release);
    }

    /// Appends a record, returning where it landed.
    pub fn append(
        &self,
        topic: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<DeliveryMetadata, BrokerError> {
        if self.state.unavailable.load(Ordering::Acquire) {
            return Err(BrokerError::Unavailable("broker is not reachable".to_string()));
        }

        let partition = partition_for(key, self.state.partitions);
        let mut topics = self.state.topics.lock();
        let log = topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); self.state.partitions as usize]);
        let records = &mut log[partition as usize];
        let offset = records.len() as i64;
        records.push(StoredRecord {
            key: key.to_vec(),
            value: value.to_vec(),
        });

        Ok(DeliveryMetadata {
            topic: topic.to_string(),
            partition: Some(partition),
            offset: Some(offset),
        })
    }

    /// Total number of records across all partitions of `topic`.
    pub fn record_count(&self, topic: &str) -> usize {
        self.state
            .topics
            .lock()
            .get(topic)
            .map(|log| log.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Offset the next record appended to the partition will get.
    pub fn end_offset(&self, topic: &str, partition: i32) -> Result<i64, BrokerError> {
        if partition < 0 || partition >= self.state.partitions {
            return Err(BrokerError::InvalidState(format!(
                "unknown partition {topic}[{partition}]"
            )));
        }

        let topics = self.state.topics.lock();
        Ok(topics
            .get(topic)
            .map(|log| log[partition as usize].len() as i64)
            .unwrap_or(0))
    }

    fn read(&self, topic: &str, partition: i32, from: i64, max: usize) -> Vec<Record> {
        let topics = self.state.topics.lock();
        let Some(records) = topics.get(topic).and_then(|log| log.get(partition as usize)) else {
            return Vec::new();
        };

        records
            .iter()
            .enumerate()
            .skip(from.max(0) as usize)
            .take(max)
            .map(|(offset, stored)| Record {
                partition,
                offset: offset as i64,
                key: stored.key.clone(),
                value: stored.value.clone(),
            })
            .collect()
    }

    pub fn producer(&self) -> MemoryProducer {
        self.state.counters.producers_created.fetch_add(1, Ordering::Relaxed);
        MemoryProducer {
            broker: self.clone(),
            closed: AtomicBool::new(false),
            fail_close: false,
        }
    }

    pub fn consumer(&self) -> MemoryConsumer {
        self.state.counters.consumers_created.fetch_add(1, Ordering::Relaxed);
        MemoryConsumer {
            broker: self.clone(),
            subscription: None,
            closed: false,
            fail_close: false,
            stalled_polls: 0,
            max_poll_records: DEFAULT_MAX_POLL_RECORDS,
            polls: 0,
            subscribe_calls: 0,
        }
    }

    pub fn factory(&self) -> MemoryFactory {
        MemoryFactory::new(self.clone())
    }

    pub fn producers_created(&self) -> usize {
        self.state.counters.producers_created.load(Ordering::Relaxed)
    }

    pub fn consumers_created(&self) -> usize {
        self.state.counters.consumers_created.load(Ordering::Relaxed)
    }

    /// Number of close attempts on producers, successful or not.
    pub fn producers_closed(&self) -> usize {
        self.state.counters.producers_closed.load(Ordering::Relaxed)
    }

    /// Number of close attempts on consumers, successful or not.
    pub fn consumers_closed(&self) -> usize {
        self.state.counters.consumers_closed.load(Ordering::Relaxed)
    }
}

/// Producer writing straight into a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryProducer {
    broker: MemoryBroker,
    closed: AtomicBool,
    fail_close: bool,
}

impl MemoryProducer {
    /// Makes `close` report an error (the producer still ends up closed).
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl LogProducer for MemoryProducer {
    fn send(
        &self,
        topic: &str,
        key: &[u8],
        value: &[u8],
        on_delivery: DeliveryCallback,
    ) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        if self.broker.state.queue_full.load(Ordering::Acquire) {
            return Err(BrokerError::Unavailable("local queue is full".to_string()));
        }

        let report = self.broker.append(topic, key, value).map_err(|error| DeliveryFailure {
            metadata: Some(DeliveryMetadata {
                topic: topic.to_string(),
                partition: None,
                offset: None,
            }),
            error,
        });
        on_delivery(report);

        Ok(())
    }

    fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.broker
            .state
            .counters
            .producers_closed
            .fetch_add(1, Ordering::Relaxed);

        if self.fail_close {
            return Err(BrokerError::Unavailable("failed to flush on close".to_string()));
        }
        Ok(())
    }
}

struct Subscription {
    topic: String,
    listener: Option<Box<dyn RebalanceListener>>,
    // Read positions, one per partition; `None` until the first poll assigns them.
    positions: Option<Vec<i64>>,
}

struct MemoryCursor<'a> {
    broker: &'a MemoryBroker,
    positions: &'a mut [i64],
}

impl PartitionCursor for MemoryCursor<'_> {
    fn end_offset(&self, partition: &TopicPartition) -> Result<i64, BrokerError> {
        self.broker.end_offset(&partition.topic, partition.partition)
    }

    fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<(), BrokerError> {
        if offset < 0 {
            return Err(BrokerError::InvalidState(format!(
                "cannot seek {partition} to negative offset {offset}"
            )));
        }

        let position = usize::try_from(partition.partition)
            .ok()
            .and_then(|p| self.positions.get_mut(p))
            .ok_or_else(|| BrokerError::InvalidState(format!("{partition} is not assigned")))?;
        *position = offset;
        Ok(())
    }
}

/// Consumer reading from a [`MemoryBroker`].
///
/// Like a fresh Kafka consumer group with `auto.offset.reset=earliest`, every
/// partition starts at offset 0. Partitions are assigned on the first poll
/// after subscribing, which is when the rebalance listener runs.
pub struct MemoryConsumer {
    broker: MemoryBroker,
    subscription: Option<Subscription>,
    closed: bool,
    fail_close: bool,
    stalled_polls: usize,
    max_poll_records: usize,
    polls: usize,
    subscribe_calls: usize,
}

impl MemoryConsumer {
    pub fn with_max_poll_records(mut self, max: usize) -> Self {
        self.max_poll_records = max.max(1);
        self
    }

    /// Makes `close` report an error (the consumer still ends up closed).
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// The next `polls` polls return nothing, as if the broker were slow.
    pub fn stall_polls(&mut self, polls: usize) {
        self.stalled_polls = polls;
    }

    pub fn poll_count(&self) -> usize {
        self.polls
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl std::fmt::Debug for MemoryConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConsumer")
            .field("topic", &self.subscription.as_ref().map(|s| s.topic.as_str()))
            .field("closed", &self.closed)
            .field("polls", &self.polls)
            .finish()
    }
}

impl LogConsumer for MemoryConsumer {
    fn subscribe(
        &mut self,
        topic: &str,
        listener: Option<Box<dyn RebalanceListener>>,
    ) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }

        self.subscribe_calls += 1;
        self.subscription = Some(Subscription {
            topic: topic.to_string(),
            listener,
            positions: None,
        });
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }

        if let Some(subscription) = self.subscription.take() {
            if let Some(listener) = &subscription.listener {
                let partitions: Vec<TopicPartition> = (0..self.broker.partitions())
                    .map(|p| TopicPartition::new(subscription.topic.as_str(), p))
                    .collect();
                listener.on_partitions_revoked(&partitions);
            }
        }
        Ok(())
    }

    fn poll(&mut self, _timeout: Duration) -> Result<Vec<Record>, BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        let Some(subscription) = self.subscription.as_mut() else {
            return Err(BrokerError::InvalidState(
                "consumer is not subscribed to any topic".to_string(),
            ));
        };

        self.polls += 1;

        if subscription.positions.is_none() {
            let partitions: Vec<TopicPartition> = (0..self.broker.partitions())
                .map(|p| TopicPartition::new(subscription.topic.as_str(), p))
                .collect();
            let mut positions = vec![0; partitions.len()];

            if let Some(listener) = &subscription.listener {
                let mut cursor = MemoryCursor {
                    broker: &self.broker,
                    positions: &mut positions,
                };
                listener.on_partitions_assigned(&mut cursor, &partitions);
            }
            subscription.positions = Some(positions);
        }

        if self.stalled_polls > 0 {
            self.stalled_polls -= 1;
            return Ok(Vec::new());
        }

        let mut batch = Vec::new();
        if let Some(positions) = subscription.positions.as_mut() {
            for (partition, position) in positions.iter_mut().enumerate() {
                let room = self.max_poll_records - batch.len();
                if room == 0 {
                    break;
                }

                let records = self
                    .broker
                    .read(&subscription.topic, partition as i32, *position, room);
                *position += records.len() as i64;
                batch.extend(records);
            }
        }

        Ok(batch)
    }

    fn close(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.subscription = None;
        self.broker
            .state
            .counters
            .consumers_closed
            .fetch_add(1, Ordering::Relaxed);

        if self.fail_close {
            return Err(BrokerError::Unavailable("failed to leave group on close".to_string()));
        }
        Ok(())
    }
}

/// Builds memory clients, optionally failing on construction or close.
#[derive(Debug, Clone)]
pub struct MemoryFactory {
    broker: MemoryBroker,
    fail_producer: bool,
    fail_consumer: bool,
    fail_producer_close: bool,
    fail_consumer_close: bool,
    max_poll_records: usize,
}

impl MemoryFactory {
    pub fn new(broker: MemoryBroker) -> Self {
        Self {
            broker,
            fail_producer: false,
            fail_consumer: false,
            fail_producer_close: false,
            fail_consumer_close: false,
            max_poll_records: DEFAULT_MAX_POLL_RECORDS,
        }
    }

    pub fn failing_producer(mut self) -> Self {
        self.fail_producer = true;
        self
    }

    pub fn failing_consumer(mut self) -> Self {
        self.fail_consumer = true;
        self
    }

    pub fn failing_producer_close(mut self) -> Self {
        self.fail_producer_close = true;
        self
    }

    pub fn failing_consumer_close(mut self) -> Self {
        self.fail_consumer_close = true;
        self
    }

    pub fn max_poll_records(mut self, max: usize) -> Self {
        self.max_poll_records = max;
        self
    }

    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }
}

impl ClientFactory for MemoryFactory {
    type Producer = MemoryProducer;
    type Consumer = MemoryConsumer;

    fn create_producer(
        &self,
        _properties: &ClientProperties,
    ) -> Result<MemoryProducer, BrokerError> {
        if self.fail_producer {
            return Err(BrokerError::Unavailable("cannot create producer".to_string()));
        }

        let producer = self.broker.producer();
        Ok(if self.fail_producer_close {
            producer.failing_close()
        } else {
            producer
        })
    }

    fn create_consumer(
        &self,
        _properties: &ClientProperties,
    ) -> Result<MemoryConsumer, BrokerError> {
        if self.fail_consumer {
            return Err(BrokerError::Unavailable("cannot create consumer".to_string()));
        }

        let consumer = self.broker.consumer().with_max_poll_records(self.max_poll_records);
        Ok(if self.fail_consumer_close {
            consumer.failing_close()
        } else {
            consumer
        })
    }
}
