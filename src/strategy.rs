//! Single-node resume strategy.
//!
//! Owns the two broker clients. Positions are published through the producer
//! as the consumer makes progress, and on restart the topic is replayed
//! through the consumer to rebuild the position cache. There is no leader
//! election here: exactly one instance is expected to write to a given topic.

use crate::{
    Resumable, Serializable,
    config::ResumeConfig,
    consumer::{ReplayReader, ReplayStats, SeekOnAssign},
    error::{BrokerError, ClientKind, Error, Result},
    logic::ResumeAdapter,
    producer::{LogWriter, WriteError},
    stream::{ClientFactory, LogConsumer, LogProducer, RebalanceListener},
};

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

const STATUS_UNINITIALIZED: usize = 0;
const STATUS_INITIALIZED: usize = 1;
const STATUS_RUNNING: usize = 2;
const STATUS_STOPPED: usize = 3;

/// Read path state, locked as a unit so replay never blocks the write path.
struct ReadSide<C> {
    consumer: Option<C>,
    subscribed: bool,
}

/// Publishes positions to a topic and replays them on startup.
///
/// The lifecycle is `init` → `start` → `stop`. A stopped strategy cannot be
/// initialized again; build a new one instead. Dropping a strategy stops it.
///
/// Writes and replays take `&self` and may run on different threads at the
/// same time. A replay holds the consumer for its whole duration, so
/// concurrent replays on one instance run one after the other.
pub struct ResumeStrategy<F: ClientFactory, K, V> {
    config: ResumeConfig,
    factory: F,
    producer: Option<F::Producer>,
    read: Mutex<ReadSide<F::Consumer>>,
    adapter: ResumeAdapter<K, V>,
    writer: LogWriter,
    status: AtomicUsize,
}

impl<F: ClientFactory, K, V> ResumeStrategy<F, K, V> {
    /// Creates a strategy. Clients are built by [`init`](Self::init).
    pub fn new(config: ResumeConfig, factory: F) -> Self {
        let writer = LogWriter::new(config.topic());

        Self {
            config,
            factory,
            producer: None,
            read: Mutex::new(ReadSide {
                consumer: None,
                subscribed: false,
            }),
            adapter: ResumeAdapter::default(),
            writer,
            status: AtomicUsize::new(STATUS_UNINITIALIZED),
        }
    }

    /// Uses a pre-built producer instead of asking the factory for one.
    pub fn with_producer(mut self, producer: F::Producer) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Uses a pre-built consumer instead of asking the factory for one.
    pub fn with_consumer(mut self, consumer: F::Consumer) -> Self {
        self.read.get_mut().consumer = Some(consumer);
        self
    }

    pub fn with_adapter(mut self, adapter: ResumeAdapter<K, V>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Builds whichever clients are missing.
    ///
    /// Calling it again once both clients exist does nothing. Both
    /// constructors are attempted even if the first one fails, and the first
    /// failure is returned.
    pub fn init(&mut self) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::Stopped);
        }

        debug!(topic = %self.config.topic(), "initializing the resume strategy");

        let mut failure = None;

        let read = self.read.get_mut();
        if read.consumer.is_none() {
            match self.factory.create_consumer(self.config.consumer()) {
                Ok(consumer) => read.consumer = Some(consumer),
                Err(source) => {
                    error!(error = %source, "failed to create the consumer");
                    failure.get_or_insert(Error::ClientCreation {
                        client: ClientKind::Consumer,
                        source,
                    });
                }
            }
        }

        if self.producer.is_none() {
            match self.factory.create_producer(self.config.producer()) {
                Ok(producer) => self.producer = Some(producer),
                Err(source) => {
                    error!(error = %source, "failed to create the producer");
                    failure.get_or_insert(Error::ClientCreation {
                        client: ClientKind::Producer,
                        source,
                    });
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        let _ = self.status.compare_exchange(
            STATUS_UNINITIALIZED,
            STATUS_INITIALIZED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        Ok(())
    }

    /// Extension hook run after configuration. Does nothing.
    pub fn build(&self) {}

    pub fn start(&mut self) -> Result<()> {
        match self.status.load(Ordering::Acquire) {
            STATUS_STOPPED => Err(Error::Stopped),
            STATUS_UNINITIALIZED => Err(Error::NotInitialized),
            _ => {
                info!(topic = %self.config.topic(), "starting the resume strategy");
                self.status.store(STATUS_RUNNING, Ordering::Release);
                Ok(())
            }
        }
    }

    /// Closes the producer, then the consumer.
    ///
    /// A failure closing one does not prevent closing the other. Failures are
    /// logged and never returned. Stopping twice does nothing.
    pub fn stop(&mut self) {
        if self.status.swap(STATUS_STOPPED, Ordering::AcqRel) == STATUS_STOPPED {
            return;
        }

        if let Some(producer) = self.producer.take() {
            info!("closing the producer");
            if let Err(e) = producer.close() {
                warn!(error = %e, "failed to close the producer");
            }
        }

        let read = self.read.get_mut();
        if let Some(mut consumer) = read.consumer.take() {
            info!("closing the consumer");
            if let Err(e) = consumer.close() {
                warn!(error = %e, "failed to close the consumer");
            }
        }

        read.subscribed = false;
    }

    /// Same as [`stop`](Self::stop).
    pub fn close(&mut self) {
        self.stop();
    }

    /// Publishes the latest position of `resumable` and mirrors it into the cache.
    ///
    /// Returns once the record is enqueued. The cache is updated whether or
    /// not the broker takes the record; delivery failures show up in
    /// [`producer_errors`](Self::producer_errors). Only a closed producer is
    /// reported here.
    pub fn update_last_offset<R>(&self, resumable: &R) -> Result<()>
    where
        R: Resumable<Key = K, Offset = V>,
        K: Serializable,
        V: Serializable,
    {
        if self.is_stopped() {
            return Err(Error::Stopped);
        }
        let producer = self.producer.as_ref().ok_or(Error::NotInitialized)?;

        let key = resumable.offset_key();
        let offset = resumable.last_offset();
        let key_bytes = key.serialize();
        let offset_bytes = offset.serialize();

        debug!(
            topic = %self.config.topic(),
            key_len = key_bytes.len(),
            value_len = offset_bytes.len(),
            "updating offset"
        );

        let appended = self.writer.append(producer, &key_bytes, &offset_bytes);
        self.adapter.mirror(key, offset);

        appended.map_err(Error::from)
    }

    /// Subscribes to the topic unless already subscribed.
    ///
    /// With a cache of capacity N ≥ 1, each assigned partition is rewound to
    /// its last N records. Otherwise the whole topic is read.
    pub fn subscribe(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::Stopped);
        }
        self.subscribe_to(&mut self.read.lock())
    }

    fn subscribe_to(&self, read: &mut ReadSide<F::Consumer>) -> Result<()> {
        if read.subscribed {
            return Ok(());
        }
        let consumer = read.consumer.as_mut().ok_or(Error::NotInitialized)?;

        let depth = self.adapter.replay_depth();
        let listener: Option<Box<dyn RebalanceListener>> = if depth >= 1 {
            Some(Box::new(SeekOnAssign::new(depth)))
        } else {
            None
        };

        debug!(topic = %self.config.topic(), depth, "subscribing");
        consumer.subscribe(self.config.topic(), listener)?;
        read.subscribed = true;

        Ok(())
    }

    /// Leaves the topic. Never fails; problems are logged.
    pub fn unsubscribe(&self) {
        self.unsubscribe_from(&mut self.read.lock());
    }

    fn unsubscribe_from(&self, read: &mut ReadSide<F::Consumer>) {
        let topic = self.config.topic();

        if let Some(consumer) = read.consumer.as_mut() {
            match consumer.unsubscribe() {
                Ok(()) => {}
                Err(BrokerError::Closed) => {
                    warn!(
                        topic = %topic,
                        "the consumer is likely already closed, skipping unsubscribe"
                    );
                }
                Err(e) => {
                    error!(topic = %topic, error = %e, "error unsubscribing from the topic");
                }
            }
        }

        read.subscribed = false;
    }

    /// Replays the topic into the adapter's deserializer, then unsubscribes.
    ///
    /// Fails before subscribing if the adapter is not deserializable.
    pub fn load_cache(&self) -> Result<ReplayStats> {
        if !self.adapter.is_deserializable() {
            return Err(Error::NotDeserializable);
        }
        if self.is_stopped() {
            return Err(Error::Stopped);
        }

        let mut read = self.read.lock();
        self.subscribe_to(&mut read)?;

        debug!(topic = %self.config.topic(), "loading records from topic");

        let result = match (read.consumer.as_mut(), self.adapter.deserializer()) {
            (Some(consumer), Some(mut deserializer)) => ReplayReader::new(
                consumer,
                self.config.poll_timeout(),
                self.config.retry_count(),
                self.config.halt(),
            )
            .run(&mut **deserializer)
            .map_err(Error::from),
            (None, _) => Err(Error::NotInitialized),
            (_, None) => Err(Error::NotDeserializable),
        };

        self.unsubscribe_from(&mut read);

        let stats = result?;
        debug!(
            topic = %self.config.topic(),
            batches = stats.batches,
            records = stats.records,
            "finished loading records"
        );
        Ok(stats)
    }

    /// Snapshot of the deliveries the broker failed to acknowledge.
    pub fn producer_errors(&self) -> Vec<WriteError> {
        self.writer.errors()
    }

    pub fn reset_producer_errors(&self) {
        self.writer.clear_errors();
    }

    pub fn is_subscribed(&self) -> bool {
        self.read.lock().subscribed
    }

    pub fn is_initialized(&self) -> bool {
        self.producer.is_some() && self.read.lock().consumer.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.status.load(Ordering::Acquire) == STATUS_RUNNING
    }

    pub fn is_stopped(&self) -> bool {
        self.status.load(Ordering::Acquire) == STATUS_STOPPED
    }

    pub fn topic(&self) -> &str {
        self.config.topic()
    }

    pub fn config(&self) -> &ResumeConfig {
        &self.config
    }

    pub fn poll_timeout(&self) -> Duration {
        self.config.poll_timeout()
    }

    pub fn set_poll_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.config.set_poll_timeout(timeout)?;
        Ok(())
    }

    pub fn adapter(&self) -> &ResumeAdapter<K, V> {
        &self.adapter
    }

    pub fn set_adapter(&mut self, adapter: ResumeAdapter<K, V>) {
        self.adapter = adapter;
    }

    pub fn producer(&self) -> Option<&F::Producer> {
        self.producer.as_ref()
    }

    /// Locks the consumer. Blocks while a replay is running.
    pub fn consumer(&self) -> Option<MappedMutexGuard<'_, F::Consumer>> {
        MutexGuard::try_map(self.read.lock(), |read| read.consumer.as_mut()).ok()
    }

    pub fn consumer_mut(&mut self) -> Option<&mut F::Consumer> {
        self.read.get_mut().consumer.as_mut()
    }
}

impl<F: ClientFactory, K, V> Drop for ResumeStrategy<F, K, V> {
    fn drop(&mut self) {
        self.stop();
    }
}
