//! Shared setup for the integration tests.

use evresume::{
    ReplayHalt, ResumeAdapter, ResumeConfig, ResumeStrategy,
    testing::{CacheLoader, MemoryBroker, MemoryCache, MemoryFactory, Position},
};

use std::{sync::Arc, time::Duration};

pub const TOPIC: &str = "resume-offsets";

pub type Strategy = ResumeStrategy<MemoryFactory, String, i64>;

pub fn config(halt: ReplayHalt) -> ResumeConfig {
    ResumeConfig::builder(TOPIC)
        .poll_timeout(Duration::from_millis(1))
        .retry_count(10)
        .halt(halt)
        .build()
        .expect("valid config")
}

/// Initialized strategy with no adapter capabilities.
pub fn writer(broker: &MemoryBroker) -> Strategy {
    let mut strategy = ResumeStrategy::new(config(ReplayHalt::Batch), broker.factory());
    strategy.init().expect("init");
    strategy.start().expect("start");
    strategy
}

/// Initialized strategy replaying into a cache of the given capacity.
pub fn reader(
    factory: MemoryFactory,
    capacity: i64,
    halt: ReplayHalt,
) -> (Strategy, Arc<MemoryCache<String, i64>>) {
    let cache = Arc::new(MemoryCache::new(capacity));
    let loader = CacheLoader::new(cache.clone());
    reader_with_loader(factory, cache, loader, halt)
}

pub fn reader_with_loader(
    factory: MemoryFactory,
    cache: Arc<MemoryCache<String, i64>>,
    loader: CacheLoader,
    halt: ReplayHalt,
) -> (Strategy, Arc<MemoryCache<String, i64>>) {
    let adapter = ResumeAdapter::<String, i64>::new()
        .with_cache(cache.clone())
        .with_deserializer(loader);

    let mut strategy = ResumeStrategy::new(config(halt), factory).with_adapter(adapter);
    strategy.init().expect("init");
    (strategy, cache)
}

/// Publishes `k{i}` → `i * 10` for every `i` in the range.
pub fn write_positions(strategy: &Strategy, range: std::ops::Range<i64>) {
    for i in range {
        strategy
            .update_last_offset(&Position::new(format!("k{i}"), i * 10))
            .expect("update");
    }
}

pub fn keys(range: std::ops::Range<i64>) -> Vec<String> {
    range.map(|i| format!("k{i}")).collect()
}
