//! Write path: appends position records and keeps track of failed deliveries.

use crate::{
    error::BrokerError,
    stream::{DeliveryMetadata, DeliveryReport, LogProducer},
};

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

/// A record the broker failed to acknowledge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteError {
    /// Serialized key of the record that was lost.
    pub key: Vec<u8>,
    /// Whatever the broker reported about the record, if anything.
    pub metadata: Option<DeliveryMetadata>,
    pub cause: BrokerError,
}

/// Append-only list of delivery failures, shared with the producer's I/O thread.
///
/// Entries are only removed by an explicit [`clear`](Self::clear). Nothing caps
/// its size: a broker that stays unreachable makes it grow until the owner
/// drains it.
#[derive(Debug, Default)]
pub struct ErrorQueue {
    errors: Mutex<Vec<WriteError>>,
}

impl ErrorQueue {
    pub fn push(&self, error: WriteError) {
        self.errors.lock().push(error);
    }

    /// Copy of the failures recorded so far, in delivery order.
    pub fn snapshot(&self) -> Vec<WriteError> {
        self.errors.lock().clone()
    }

    pub fn clear(&self) {
        self.errors.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }
}

/// Appends serialized positions to a fixed topic without waiting for the broker.
#[derive(Debug)]
pub struct LogWriter {
    topic: String,
    errors: Arc<ErrorQueue>,
}

impl LogWriter {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            errors: Arc::new(ErrorQueue::default()),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Enqueues a record and returns.
    ///
    /// The broker acknowledgment arrives later on the producer's own thread. A
    /// failed acknowledgment is recorded in the error queue and never reaches
    /// the caller. So is a record the producer refused to enqueue, for example
    /// because its local queue is full. Only a closed producer is reported as
    /// an `Err`.
    pub fn append<P>(&self, producer: &P, key: &[u8], value: &[u8]) -> Result<(), BrokerError>
    where
        P: LogProducer + ?Sized,
    {
        let errors = Arc::clone(&self.errors);
        let record_key = key.to_vec();

        let sent = producer.send(
            &self.topic,
            key,
            value,
            Box::new(move |report: DeliveryReport| {
                if let Err(failure) = report {
                    error!(error = %failure.error, "failed to send position record");
                    errors.push(WriteError {
                        key: record_key,
                        metadata: failure.metadata,
                        cause: failure.error,
                    });
                }
            }),
        );

        match sent {
            Ok(()) => Ok(()),
            Err(BrokerError::Closed) => Err(BrokerError::Closed),
            Err(cause) => {
                error!(topic = %self.topic, error = %cause, "failed to enqueue position record");
                self.errors.push(WriteError {
                    key: key.to_vec(),
                    metadata: None,
                    cause,
                });
                Ok(())
            }
        }
    }

    /// Failed deliveries recorded so far.
    pub fn errors(&self) -> Vec<WriteError> {
        self.errors.snapshot()
    }

    pub fn clear_errors(&self) {
        self.errors.clear();
    }
}
