//! Checkpoint and resume for stream consumers, backed by a partitioned log.
//!
//! A consumer records "last processed position" markers by publishing them to
//! a topic on the broker. On restart, a bounded suffix of that topic is
//! replayed to rebuild an in-memory position cache before normal processing
//! resumes.

pub mod config;
pub mod consumer;
pub mod error;
pub mod logic;
pub mod producer;
pub mod strategy;
pub mod stream;

#[cfg(feature = "kafka")]
pub mod kafka;

/// In-memory broker and fixtures for tests.
///
/// Only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ClientProperties, ReplayHalt, ResumeConfig};
pub use consumer::{ReplayReader, ReplayStats, SeekOnAssign};
pub use error::{BrokerError, ClientKind, ConfigError, Error, Result};
pub use logic::{Cacheable, Deserializable, ResumeAdapter};
pub use producer::{LogWriter, WriteError};
pub use strategy::ResumeStrategy;
pub use stream::{ClientFactory, LogConsumer, LogProducer, PartitionCursor, RebalanceListener};

/// Turns a position key or value into the raw bytes stored on the topic.
///
/// Reading them back is the job of a [`Deserializable`] adapter.
pub trait Serializable {
    /// Returns the bytes written to the topic for this value.
    ///
    /// Equal values must produce equal bytes, since keys are compared and
    /// partitioned by their serialized form.
    fn serialize(&self) -> Vec<u8>;
}

impl Serializable for String {
    fn serialize(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl Serializable for Vec<u8> {
    fn serialize(&self) -> Vec<u8> {
        self.clone()
    }
}

impl Serializable for i64 {
    fn serialize(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }
}

impl Serializable for u64 {
    fn serialize(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }
}

/// Something whose progress can be checkpointed.
///
/// The key identifies the stream position being tracked (a file, a partition,
/// a table) and the offset is how far processing has gone. Records for the
/// same key are appended, never overwritten; the latest one wins by
/// convention of the caller.
pub trait Resumable {
    type Key: Serializable;
    type Offset: Serializable;

    /// Identifies the stream whose progress is recorded.
    ///
    /// Used as the record key, so every position of one stream lands on the
    /// same partition.
    fn offset_key(&self) -> Self::Key;

    /// How far the stream has been processed.
    fn last_offset(&self) -> Self::Offset;
}
