use crate::{config::ClientProperties, error::BrokerError};

use std::time::Duration;

/// A partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// A record read back from the topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub partition: i32,
    pub offset: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Broker acknowledgment details for a produced record.
///
/// Partition and offset are only known once the broker has accepted the
/// record, so a failed delivery may carry neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryMetadata {
    pub topic: String,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

/// A delivery acknowledgment that reported an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub metadata: Option<DeliveryMetadata>,
    pub error: BrokerError,
}

/// Outcome of an asynchronous append.
pub type DeliveryReport = Result<DeliveryMetadata, DeliveryFailure>;

/// Invoked exactly once per record when the broker acknowledges (or fails) it.
///
/// Typically runs on the client's internal I/O thread, never on the caller's.
pub type DeliveryCallback = Box<dyn FnOnce(DeliveryReport) + Send + Sync>;

/// Write side of the broker.
///
/// Common backends include Kafka and Redpanda.
pub trait LogProducer: Send + Sync {
    /// Enqueues a record for the topic and returns without waiting for the broker.
    ///
    /// An error here means the record was never enqueued, in which case
    /// `on_delivery` is dropped without being called. Otherwise the callback
    /// receives the acknowledgment once the broker has answered.
    fn send(
        &self,
        topic: &str,
        key: &[u8],
        value: &[u8],
        on_delivery: DeliveryCallback,
    ) -> Result<(), BrokerError>;

    /// Flushes outstanding records and releases the client.
    fn close(&self) -> Result<(), BrokerError>;
}

/// Read side of the broker.
pub trait LogConsumer: Send + Sync {
    /// Joins the topic. Partitions are assigned later, during a poll, at which
    /// point `listener` (if any) is told about them.
    fn subscribe(
        &mut self,
        topic: &str,
        listener: Option<Box<dyn RebalanceListener>>,
    ) -> Result<(), BrokerError>;

    /// Leaves the topic and drops any installed listener.
    fn unsubscribe(&mut self) -> Result<(), BrokerError>;

    /// Returns the next batch of records, blocking at most `timeout`.
    ///
    /// An empty batch means nothing arrived within the timeout, not that the
    /// topic is exhausted.
    fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>, BrokerError>;

    fn close(&mut self) -> Result<(), BrokerError>;
}

/// Read cursor control handed to a [`RebalanceListener`] during assignment.
pub trait PartitionCursor {
    /// The offset the next produced record will get, as reported by the broker.
    fn end_offset(&self, partition: &TopicPartition) -> Result<i64, BrokerError>;

    /// Moves the read position of an assigned partition.
    fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<(), BrokerError>;
}

/// Hooks into broker-driven partition reassignment.
pub trait RebalanceListener: Send + Sync {
    /// Partitions taken away from this consumer.
    fn on_partitions_revoked(&self, _partitions: &[TopicPartition]) {}

    /// Partitions newly given to this consumer, before any record is fetched.
    fn on_partitions_assigned(
        &self,
        cursor: &mut dyn PartitionCursor,
        partitions: &[TopicPartition],
    );
}

/// Builds the two broker clients from pass-through properties.
pub trait ClientFactory {
    type Producer: LogProducer;
    type Consumer: LogConsumer;

    fn create_producer(&self, properties: &ClientProperties) -> Result<Self::Producer, BrokerError>;

    fn create_consumer(&self, properties: &ClientProperties) -> Result<Self::Consumer, BrokerError>;
}
