//! Replay of published positions into a fresh cache.

mod common;

use common::*;
use evresume::{
    Error, LogConsumer, ReplayHalt, ResumeAdapter, ResumeStrategy,
    testing::{CacheLoader, MemoryBroker, MemoryCache, Position, partition_for},
};

use std::sync::{Arc, atomic::Ordering};

#[test]
fn test_replay_depth_keeps_latest_records() {
    let broker = MemoryBroker::new();
    let writer = writer(&broker);
    write_positions(&writer, 0..10);
    assert_eq!(broker.record_count(TOPIC), 10);

    let (reader, cache) = reader(broker.factory(), 5, ReplayHalt::Batch);
    let stats = reader.load_cache().unwrap();

    assert_eq!(stats.records, 5);
    assert_eq!(cache.keys(), keys(5..10));
    for i in 5..10 {
        assert_eq!(cache.get(&format!("k{i}")), Some(i * 10));
    }
}

#[test]
fn test_replay_rebuilds_every_written_key() {
    let broker = MemoryBroker::new();
    let writer = writer(&broker);
    write_positions(&writer, 0..5);

    let (reader, cache) = reader(broker.factory(), 8, ReplayHalt::Batch);
    reader.load_cache().unwrap();

    assert_eq!(cache.len(), 5);
    for i in 0..5 {
        assert_eq!(cache.get(&format!("k{i}")), Some(i * 10));
    }
}

#[test]
fn test_latest_value_wins_after_replay() {
    let broker = MemoryBroker::new();
    let writer = writer(&broker);
    writer.update_last_offset(&Position::new("file-a", 1)).unwrap();
    writer.update_last_offset(&Position::new("file-b", 7)).unwrap();
    writer.update_last_offset(&Position::new("file-a", 2)).unwrap();

    let (reader, cache) = reader(broker.factory(), 10, ReplayHalt::Batch);
    reader.load_cache().unwrap();

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get(&"file-a".to_string()), Some(2));
    assert_eq!(cache.get(&"file-b".to_string()), Some(7));
}

#[test]
fn test_unbounded_cache_replays_everything() {
    let broker = MemoryBroker::new();
    let writer = writer(&broker);
    write_positions(&writer, 0..10);

    let (reader, cache) = reader(broker.factory(), 0, ReplayHalt::Batch);
    let stats = reader.load_cache().unwrap();

    assert_eq!(stats.records, 10);
    assert_eq!(cache.keys(), keys(0..10));
}

#[test]
fn test_adapter_without_cache_replays_everything() {
    let broker = MemoryBroker::new();
    let writer = writer(&broker);
    write_positions(&writer, 0..10);

    let target = Arc::new(MemoryCache::<String, i64>::new(3));
    let adapter = ResumeAdapter::<String, i64>::new().with_deserializer(CacheLoader::new(target));
    let mut reader: Strategy =
        ResumeStrategy::new(config(ReplayHalt::Batch), broker.factory()).with_adapter(adapter);
    reader.init().unwrap();

    // The capacity of a cache the strategy does not know about is irrelevant.
    let stats = reader.load_cache().unwrap();
    assert_eq!(stats.records, 10);
}

#[test]
fn test_depth_beyond_topic_start_does_not_seek() {
    let broker = MemoryBroker::new();
    let writer = writer(&broker);
    write_positions(&writer, 0..10);

    let (reader, cache) = reader(broker.factory(), 20, ReplayHalt::Batch);
    let stats = reader.load_cache().unwrap();

    assert_eq!(stats.records, 10);
    assert_eq!(cache.keys(), keys(0..10));
}

#[test]
fn test_empty_topic_finishes_after_retries() {
    let broker = MemoryBroker::new();

    let (reader, cache) = reader(broker.factory(), 5, ReplayHalt::Batch);
    let stats = reader.load_cache().unwrap();

    assert_eq!(stats.records, 0);
    assert_eq!(stats.batches, 0);
    assert!(cache.is_empty());
    assert_eq!(reader.consumer().unwrap().poll_count(), 10);
}

#[test]
fn test_depth_applies_per_partition() {
    let broker = MemoryBroker::with_partitions(3);
    let writer = writer(&broker);
    write_positions(&writer, 0..30);

    let mut per_partition = [0usize; 3];
    for key in keys(0..30) {
        per_partition[partition_for(key.as_bytes(), 3) as usize] += 1;
    }
    let expected: usize = per_partition.iter().map(|n| (*n).min(2)).sum();

    let (reader, cache) = reader(broker.factory(), 2, ReplayHalt::Batch);
    let stats = reader.load_cache().unwrap();

    assert_eq!(stats.records, expected);
    assert_eq!(cache.len(), expected.min(2));
}

#[test]
fn test_replay_survives_slow_broker() {
    let broker = MemoryBroker::new();
    let writer = writer(&broker);
    write_positions(&writer, 0..3);

    let (mut reader, cache) = reader(broker.factory(), 0, ReplayHalt::Batch);
    reader.consumer_mut().unwrap().stall_polls(9);
    reader.load_cache().unwrap();

    assert_eq!(cache.keys(), keys(0..3));
}

#[test]
fn test_replay_gives_up_when_broker_stays_silent() {
    let broker = MemoryBroker::new();
    let writer = writer(&broker);
    write_positions(&writer, 0..3);

    let (mut reader, cache) = reader(broker.factory(), 0, ReplayHalt::Batch);
    reader.consumer_mut().unwrap().stall_polls(10);
    let stats = reader.load_cache().unwrap();

    assert_eq!(stats.records, 0);
    assert!(cache.is_empty());
}

#[test]
fn test_not_deserializable_fails_before_subscribing() {
    let broker = MemoryBroker::new();
    let mut strategy = writer(&broker);

    let err = strategy.load_cache().unwrap_err();
    assert!(matches!(err, Error::NotDeserializable));
    assert!(!strategy.is_subscribed());
    assert_eq!(strategy.consumer().unwrap().subscribe_calls(), 0);

    // The instance is still usable once an adapter is wired in.
    let cache = Arc::new(MemoryCache::<String, i64>::new(0));
    strategy.set_adapter(
        ResumeAdapter::<String, i64>::new()
            .with_cache(cache.clone())
            .with_deserializer(CacheLoader::new(cache.clone())),
    );
    write_positions(&strategy, 0..2);
    cache.clear();

    strategy.load_cache().unwrap();
    assert_eq!(cache.keys(), keys(0..2));
}

#[test]
fn test_load_cache_unsubscribes() {
    let broker = MemoryBroker::new();
    let writer = writer(&broker);
    write_positions(&writer, 0..3);

    let (reader, _cache) = reader(broker.factory(), 0, ReplayHalt::Batch);
    reader.load_cache().unwrap();

    assert!(!reader.is_subscribed());
    assert!(!reader.consumer().unwrap().is_subscribed());
}

#[test]
fn test_load_cache_twice_replays_again() {
    let broker = MemoryBroker::new();
    let writer = writer(&broker);
    write_positions(&writer, 0..4);

    let (reader, cache) = reader(broker.factory(), 0, ReplayHalt::Batch);
    reader.load_cache().unwrap();
    cache.clear();

    let stats = reader.load_cache().unwrap();
    assert_eq!(stats.records, 4);
    assert_eq!(cache.len(), 4);
    assert_eq!(reader.consumer().unwrap().subscribe_calls(), 2);
}

#[test]
fn test_stop_signal_skips_rest_of_batch_only() {
    let broker = MemoryBroker::new();
    let writer = writer(&broker);
    write_positions(&writer, 0..10);

    let cache = Arc::new(MemoryCache::new(0));
    let loader = CacheLoader::new(cache.clone()).stop_at(3);
    let seen = loader.seen();
    let (reader, cache) = reader_with_loader(
        broker.factory().max_poll_records(4),
        cache,
        loader,
        ReplayHalt::Batch,
    );

    let stats = reader.load_cache().unwrap();

    // Batches are k0..k3, k4..k7, k8..k9; k3 is skipped after the stop on k2.
    assert!(stats.halted);
    assert_eq!(stats.batches, 3);
    assert_eq!(seen.load(Ordering::Relaxed), 9);
    assert_eq!(cache.get(&"k3".to_string()), None);
    assert_eq!(cache.len(), 9);
}

#[test]
fn test_stop_signal_in_single_batch_still_terminates() {
    let broker = MemoryBroker::new();
    let writer = writer(&broker);
    write_positions(&writer, 0..10);

    let cache = Arc::new(MemoryCache::new(0));
    let loader = CacheLoader::new(cache.clone()).stop_at(3);
    let (reader, cache) =
        reader_with_loader(broker.factory(), cache, loader, ReplayHalt::Batch);

    let stats = reader.load_cache().unwrap();

    // The rest of the batch was consumed from the broker, so the next poll is empty.
    assert!(stats.halted);
    assert_eq!(stats.batches, 1);
    assert_eq!(stats.records, 3);
    assert_eq!(cache.keys(), keys(0..3));
    assert_eq!(reader.consumer().unwrap().poll_count(), 11);
}

#[test]
fn test_stop_signal_ends_replay_when_configured() {
    let broker = MemoryBroker::new();
    let writer = writer(&broker);
    write_positions(&writer, 0..10);

    let cache = Arc::new(MemoryCache::new(0));
    let loader = CacheLoader::new(cache.clone()).stop_at(3);
    let (reader, cache) = reader_with_loader(
        broker.factory().max_poll_records(4),
        cache,
        loader,
        ReplayHalt::Replay,
    );

    let stats = reader.load_cache().unwrap();

    assert!(stats.halted);
    assert_eq!(stats.batches, 1);
    assert_eq!(stats.records, 3);
    assert_eq!(cache.keys(), keys(0..3));
    assert!(!reader.is_subscribed());
}

#[test]
fn test_closed_consumer_fails_replay() {
    let broker = MemoryBroker::new();
    let writer = writer(&broker);
    write_positions(&writer, 0..3);

    let (mut reader, _cache) = reader(broker.factory(), 0, ReplayHalt::Batch);
    reader.consumer_mut().unwrap().close().unwrap();

    let err = reader.load_cache().unwrap_err();
    assert!(matches!(err, Error::Broker(_)));
    assert!(!reader.is_subscribed());
}
