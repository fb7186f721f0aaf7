//! Test utilities for the resume strategy.
//!
//! - [`MemoryBroker`] - an in-process partitioned log with failure injection
//! - [`MemoryFactory`] - builds clients against a [`MemoryBroker`]
//! - [`MemoryCache`] - a small capacity-bounded position cache
//! - [`Position`] and [`CacheLoader`] - a string-keyed position and the
//!   deserializer that loads it back into a cache
//!
//! # Example
//!
//! ```rust,ignore
//! use evresume::testing::{MemoryBroker, Position};
//!
//! let broker = MemoryBroker::new();
//! let mut strategy = ResumeStrategy::new(config, broker.factory());
//! strategy.init()?;
//! strategy.update_last_offset(&Position::new("file-a", 42))?;
//! assert_eq!(broker.record_count("offsets"), 1);
//! ```

pub mod cache;
pub mod memory;

pub use cache::{CacheLoader, MemoryCache, Position, decode_offset};
pub use memory::{MemoryBroker, MemoryConsumer, MemoryFactory, MemoryProducer, partition_for};
