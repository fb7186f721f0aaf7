//! Client ownership, subscription and shutdown.

mod common;

use common::*;
use evresume::{
    ClientKind, Error, LogConsumer, ReplayHalt, ResumeStrategy,
    testing::{MemoryBroker, Position},
};

#[test]
fn test_subscribe_is_idempotent() {
    let broker = MemoryBroker::new();
    let (strategy, _cache) = reader(broker.factory(), 5, ReplayHalt::Batch);

    strategy.subscribe().unwrap();
    strategy.subscribe().unwrap();

    assert!(strategy.is_subscribed());
    assert_eq!(strategy.consumer().unwrap().subscribe_calls(), 1);
}

#[test]
fn test_resubscribe_after_unsubscribe() {
    let broker = MemoryBroker::new();
    let (strategy, _cache) = reader(broker.factory(), 5, ReplayHalt::Batch);

    strategy.subscribe().unwrap();
    strategy.unsubscribe();
    assert!(!strategy.is_subscribed());

    strategy.subscribe().unwrap();
    assert!(strategy.is_subscribed());
    assert_eq!(strategy.consumer().unwrap().subscribe_calls(), 2);
}

#[test]
fn test_unsubscribe_without_subscription() {
    let broker = MemoryBroker::new();
    let strategy = writer(&broker);

    strategy.unsubscribe();
    assert!(!strategy.is_subscribed());
}

#[test]
fn test_unsubscribe_on_closed_consumer_is_ignored() {
    let broker = MemoryBroker::new();
    let (mut strategy, _cache) = reader(broker.factory(), 5, ReplayHalt::Batch);
    strategy.subscribe().unwrap();

    strategy.consumer_mut().unwrap().close().unwrap();
    strategy.unsubscribe();

    assert!(!strategy.is_subscribed());
}

#[test]
fn test_subscribe_before_init_fails() {
    let broker = MemoryBroker::new();
    let strategy: Strategy = ResumeStrategy::new(config(ReplayHalt::Batch), broker.factory());

    assert!(matches!(strategy.subscribe(), Err(Error::NotInitialized)));
    assert!(!strategy.is_subscribed());
}

#[test]
fn test_consumer_failure_still_builds_producer() {
    let broker = MemoryBroker::new();
    let mut strategy: Strategy =
        ResumeStrategy::new(config(ReplayHalt::Batch), broker.factory().failing_consumer());

    let err = strategy.init().unwrap_err();
    assert!(matches!(
        err,
        Error::ClientCreation {
            client: ClientKind::Consumer,
            ..
        }
    ));
    assert!(strategy.producer().is_some());
    assert!(strategy.consumer().is_none());
    assert!(!strategy.is_initialized());
    assert!(matches!(strategy.start(), Err(Error::NotInitialized)));

    strategy.stop();
    assert_eq!(broker.producers_closed(), 1);
    assert_eq!(broker.consumers_closed(), 0);
}

#[test]
fn test_producer_failure_still_builds_consumer() {
    let broker = MemoryBroker::new();
    let mut strategy: Strategy =
        ResumeStrategy::new(config(ReplayHalt::Batch), broker.factory().failing_producer());

    let err = strategy.init().unwrap_err();
    assert!(matches!(
        err,
        Error::ClientCreation {
            client: ClientKind::Producer,
            ..
        }
    ));
    assert!(strategy.producer().is_none());
    assert!(strategy.consumer().is_some());

    strategy.stop();
    assert_eq!(broker.producers_closed(), 0);
    assert_eq!(broker.consumers_closed(), 1);
}

#[test]
fn test_both_failures_report_consumer_first() {
    let broker = MemoryBroker::new();
    let factory = broker.factory().failing_producer().failing_consumer();
    let mut strategy: Strategy = ResumeStrategy::new(config(ReplayHalt::Batch), factory);

    let err = strategy.init().unwrap_err();
    assert!(matches!(
        err,
        Error::ClientCreation {
            client: ClientKind::Consumer,
            ..
        }
    ));
    assert!(strategy.producer().is_none());
    assert!(strategy.consumer().is_none());
}

#[test]
fn test_close_failures_are_isolated() {
    let broker = MemoryBroker::new();
    let factory = broker
        .factory()
        .failing_producer_close()
        .failing_consumer_close();
    let mut strategy: Strategy = ResumeStrategy::new(config(ReplayHalt::Batch), factory);
    strategy.init().unwrap();

    strategy.stop();

    assert!(strategy.is_stopped());
    assert_eq!(broker.producers_closed(), 1);
    assert_eq!(broker.consumers_closed(), 1);
    assert!(strategy.producer().is_none());
    assert!(strategy.consumer().is_none());
}

#[test]
fn test_prebuilt_clients_are_used() {
    let broker = MemoryBroker::new();
    let factory = broker.factory().failing_producer().failing_consumer();
    let mut strategy: Strategy = ResumeStrategy::new(config(ReplayHalt::Batch), factory)
        .with_producer(broker.producer())
        .with_consumer(broker.consumer());

    strategy.init().unwrap();
    strategy.start().unwrap();
    strategy
        .update_last_offset(&Position::new("file-a", 3))
        .unwrap();

    assert_eq!(broker.producers_created(), 1);
    assert_eq!(broker.consumers_created(), 1);
    assert_eq!(broker.record_count(TOPIC), 1);
}

#[test]
fn test_operations_after_stop_fail() {
    let broker = MemoryBroker::new();
    let (mut strategy, _cache) = reader(broker.factory(), 5, ReplayHalt::Batch);
    strategy.start().unwrap();
    strategy.stop();

    assert!(matches!(
        strategy.update_last_offset(&Position::new("file-a", 1)),
        Err(Error::Stopped)
    ));
    assert!(matches!(strategy.subscribe(), Err(Error::Stopped)));
    assert!(matches!(strategy.load_cache(), Err(Error::Stopped)));
    assert!(matches!(strategy.init(), Err(Error::Stopped)));

    // Unsubscribing a stopped strategy has nothing left to do.
    strategy.unsubscribe();
    assert!(!strategy.is_subscribed());
}

#[test]
fn test_stop_clears_subscription() {
    let broker = MemoryBroker::new();
    let (mut strategy, _cache) = reader(broker.factory(), 5, ReplayHalt::Batch);
    strategy.subscribe().unwrap();

    strategy.stop();

    assert!(!strategy.is_subscribed());
    assert_eq!(broker.consumers_closed(), 1);
}

#[test]
fn test_accessors() {
    let broker = MemoryBroker::new();
    let (strategy, _cache) = reader(broker.factory(), 7, ReplayHalt::Replay);

    assert_eq!(strategy.topic(), TOPIC);
    assert_eq!(strategy.config().halt(), ReplayHalt::Replay);
    assert_eq!(strategy.config().retry_count(), 10);
    assert!(strategy.adapter().is_cacheable());
    assert!(strategy.adapter().is_deserializable());
    assert_eq!(strategy.adapter().replay_depth(), 7);
    strategy.build();
}
