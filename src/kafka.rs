//! Kafka broker clients built on rdkafka.
//!
//! The producer is a `ThreadedProducer`: librdkafka delivers acknowledgments
//! on its own polling thread, which runs the per-record delivery callback.
//! The consumer is a `BaseConsumer` whose context forwards partition
//! assignments to the installed [`RebalanceListener`].
//!
//! Client properties are handed to librdkafka as-is, so any librdkafka
//! setting (`security.protocol`, `sasl.*`, `acks`, ...) can be used.

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
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use rdkafka::{
    ClientConfig, ClientContext, Message, Offset, TopicPartitionList,
    consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance},
    error::KafkaError,
    message::BorrowedMessage,
    producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer},
    util::Timeout,
};
use tracing::{debug, warn};

/// Timeout for broker metadata requests made while handling a rebalance.
const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for flushing outstanding records when the producer is closed.
const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on the records gathered by a single poll.
const MAX_POLL_RECORDS: usize = 500;

fn kafka_error(err: KafkaError) -> BrokerError {
    BrokerError::Kafka(err.to_string())
}

fn client_config(properties: &ClientProperties) -> ClientConfig {
    let mut config = ClientConfig::new();
    for (key, value) in properties.iter() {
        config.set(key, value);
    }
    config
}

/// Rejects cooperative assignors.
///
/// Seeks are applied by replacing the whole assignment during the rebalance,
/// which would drop previously owned partitions under incremental rebalancing.
fn check_assignment_strategy(properties: &ClientProperties) -> Result<(), BrokerError> {
    match properties.get("partition.assignment.strategy") {
        Some(strategy) if strategy.contains("cooperative") => Err(BrokerError::InvalidState(
            format!("assignment strategy {strategy} is not supported, use an eager assignor"),
        )),
        _ => Ok(()),
    }
}

fn metadata_of(message: &BorrowedMessage<'_>) -> DeliveryMetadata {
    DeliveryMetadata {
        topic: message.topic().to_string(),
        partition: Some(message.partition()),
        offset: (message.offset() >= 0).then_some(message.offset()),
    }
}

/// Producer context running the per-record delivery callback.
pub struct DeliveryContext;

impl ClientContext for DeliveryContext {}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = Box<DeliveryCallback>;

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, on_delivery: Self::DeliveryOpaque) {
        let report = match delivery_result {
            Ok(message) => Ok(metadata_of(message)),
            Err((err, message)) => Err(DeliveryFailure {
                metadata: Some(metadata_of(message)),
                error: kafka_error(err.clone()),
            }),
        };
        (*on_delivery)(report);
    }
}

/// Publishes position records to Kafka.
pub struct KafkaProducer {
    producer: ThreadedProducer<DeliveryContext>,
    flush_timeout: Duration,
    closed: AtomicBool,
}

impl KafkaProducer {
    pub fn new(properties: &ClientProperties) -> Result<Self, BrokerError> {
        let producer = client_config(properties)
            .create_with_context(DeliveryContext)
            .map_err(kafka_error)?;

        Ok(Self {
            producer,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            closed: AtomicBool::new(false),
        })
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }
}

impl LogProducer for KafkaProducer {
    fn send(
        &self,
        topic: &str,
        key: &[u8],
        value: &[u8],
        on_delivery: DeliveryCallback,
    ) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }

        let record = BaseRecord::<[u8], [u8], _>::with_opaque_to(topic, Box::new(on_delivery))
            .key(key)
            .payload(value);

        self.producer
            .send(record)
            .map_err(|(err, _record)| kafka_error(err))
    }

    fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        debug!(timeout_ms = self.flush_timeout.as_millis() as u64, "flushing producer");
        self.producer
            .flush(Timeout::After(self.flush_timeout))
            .map_err(kafka_error)
    }
}

/// Consumer context handing rebalances to the installed listener.
pub struct ReplayContext {
    listener: Mutex<Option<Box<dyn RebalanceListener>>>,
    metadata_timeout: Duration,
}

impl ClientContext for ReplayContext {}

impl ConsumerContext for ReplayContext {
    fn post_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        let listener = self.listener.lock();
        let Some(listener) = listener.as_ref() else {
            return;
        };

        match rebalance {
            Rebalance::Assign(assignment) => {
                let partitions = partitions_of(assignment);
                let mut cursor = AssignmentCursor {
                    consumer: base_consumer,
                    timeout: self.metadata_timeout,
                    seeks: HashMap::new(),
                };
                listener.on_partitions_assigned(&mut cursor, &partitions);

                if let Err(e) = cursor.apply(assignment) {
                    warn!(error = %e, "failed to apply seek positions");
                }
            }
            Rebalance::Revoke(revoked) => {
                listener.on_partitions_revoked(&partitions_of(revoked));
            }
            Rebalance::Error(e) => {
                warn!(error = %e, "rebalance error");
            }
        }
    }
}

fn partitions_of(list: &TopicPartitionList) -> Vec<TopicPartition> {
    list.elements()
        .iter()
        .map(|elem| TopicPartition::new(elem.topic(), elem.partition()))
        .collect()
}

/// Collects seeks requested during assignment and applies them in one reassignment.
///
/// The reassignment replaces the whole assignment, so this relies on an eager
/// rebalance handing over the full set of partitions at once.
struct AssignmentCursor<'a> {
    consumer: &'a BaseConsumer<ReplayContext>,
    timeout: Duration,
    seeks: HashMap<TopicPartition, i64>,
}

impl AssignmentCursor<'_> {
    fn apply(self, assignment: &TopicPartitionList) -> Result<(), BrokerError> {
        if self.seeks.is_empty() {
            return Ok(());
        }

        let mut positioned = TopicPartitionList::new();
        for elem in assignment.elements() {
            let key = TopicPartition::new(elem.topic(), elem.partition());
            let offset = match self.seeks.get(&key) {
                Some(target) => Offset::Offset(*target),
                None => elem.offset(),
            };
            positioned
                .add_partition_offset(elem.topic(), elem.partition(), offset)
                .map_err(kafka_error)?;
        }

        self.consumer.assign(&positioned).map_err(kafka_error)
    }
}

impl PartitionCursor for AssignmentCursor<'_> {
    fn end_offset(&self, partition: &TopicPartition) -> Result<i64, BrokerError> {
        let (_low, high) = self
            .consumer
            .fetch_watermarks(&partition.topic, partition.partition, self.timeout)
            .map_err(kafka_error)?;
        Ok(high)
    }

    fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<(), BrokerError> {
        self.seeks.insert(partition.clone(), offset);
        Ok(())
    }
}

/// Replays position records from Kafka.
pub struct KafkaConsumer {
    consumer: BaseConsumer<ReplayContext>,
    closed: bool,
}

impl KafkaConsumer {
    /// Creates the consumer. Only eager assignors (`range`, `roundrobin`) are supported.
    pub fn new(properties: &ClientProperties) -> Result<Self, BrokerError> {
        check_assignment_strategy(properties)?;

        let context = ReplayContext {
            listener: Mutex::new(None),
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
        };
        let consumer = client_config(properties)
            .create_with_context(context)
            .map_err(kafka_error)?;

        Ok(Self {
            consumer,
            closed: false,
        })
    }

    fn record_of(message: &BorrowedMessage<'_>) -> Record {
        Record {
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().unwrap_or_default().to_vec(),
            value: message.payload().unwrap_or_default().to_vec(),
        }
    }
}

impl LogConsumer for KafkaConsumer {
    fn subscribe(
        &mut self,
        topic: &str,
        listener: Option<Box<dyn RebalanceListener>>,
    ) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }

        *self.consumer.context().listener.lock() = listener;
        self.consumer.subscribe(&[topic]).map_err(kafka_error)
    }

    fn unsubscribe(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }

        self.consumer.unsubscribe();
        *self.consumer.context().listener.lock() = None;
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>, BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }

        let mut batch = Vec::new();
        let mut wait = timeout;

        while batch.len() < MAX_POLL_RECORDS {
            match self.consumer.poll(wait) {
                Some(Ok(message)) => batch.push(Self::record_of(&message)),
                Some(Err(e)) => return Err(kafka_error(e)),
                None => break,
            }
            // Only the first poll waits; the rest drain what is already fetched.
            wait = Duration::ZERO;
        }

        Ok(batch)
    }

    fn close(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Ok(());
        }

        self.closed = true;
        self.consumer.unsubscribe();
        *self.consumer.context().listener.lock() = None;
        Ok(())
    }
}

/// Builds rdkafka-backed clients.
#[derive(Debug, Clone, Default)]
pub struct KafkaFactory {
    flush_timeout: Option<Duration>,
}

impl KafkaFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long closing the producer waits for outstanding records.
    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = Some(timeout);
        self
    }
}

impl ClientFactory for KafkaFactory {
    type Producer = KafkaProducer;
    type Consumer = KafkaConsumer;

    fn create_producer(&self, properties: &ClientProperties) -> Result<KafkaProducer, BrokerError> {
        let producer = KafkaProducer::new(properties)?;
        Ok(match self.flush_timeout {
            Some(timeout) => producer.with_flush_timeout(timeout),
            None => producer,
        })
    }

    fn create_consumer(&self, properties: &ClientProperties) -> Result<KafkaConsumer, BrokerError> {
        debug!(group_id = ?properties.get("group.id"), "creating consumer");
        KafkaConsumer::new(properties)
    }
}
