//! Configuration for the resume strategy.
//!
//! Broker connection parameters are carried as [`ClientProperties`] and passed
//! verbatim to the underlying client. Only the options the strategy itself
//! interprets live on [`ResumeConfig`].

use crate::error::ConfigError;

use std::{collections::BTreeMap, time::Duration};

use tracing::debug;
use uuid::Uuid;

/// How long each poll attempt blocks waiting for data.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Number of consecutive empty polls tolerated before replay is considered complete.
pub const DEFAULT_RETRY_COUNT: u32 = 10;

/// What a `false` from the deserializer stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplayHalt {
    /// Skip the rest of the current batch. Polling continues until the broker
    /// reports an empty batch.
    #[default]
    Batch,

    /// End the whole replay.
    Replay,
}

/// Ordered key/value client settings passed through to the broker client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientProperties {
    entries: BTreeMap<String, String>,
}

impl ClientProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default settings for the client that publishes positions.
    pub fn producer_defaults(bootstrap_servers: &str) -> Result<Self, ConfigError> {
        if bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::MissingBootstrapServers);
        }

        let mut props = Self::new();
        props.set("bootstrap.servers", bootstrap_servers);
        Ok(props)
    }

    /// Default settings for the client that replays positions.
    ///
    /// Every call generates a new consumer group id, so each instance observes
    /// the full topic history instead of resuming from committed group offsets.
    pub fn consumer_defaults(bootstrap_servers: &str) -> Result<Self, ConfigError> {
        if bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::MissingBootstrapServers);
        }

        let group_id = Uuid::new_v4().to_string();
        debug!(group_id = %group_id, "creating consumer properties");

        let mut props = Self::new();
        props
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest");
        Ok(props)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Validated configuration of a [`ResumeStrategy`](crate::strategy::ResumeStrategy).
#[derive(Debug, Clone)]
pub struct ResumeConfig {
    topic: String,
    poll_timeout: Duration,
    retry_count: u32,
    halt: ReplayHalt,
    producer: ClientProperties,
    consumer: ClientProperties,
}

impl ResumeConfig {
    pub fn builder(topic: impl Into<String>) -> ResumeConfigBuilder {
        ResumeConfigBuilder {
            topic: topic.into(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            halt: ReplayHalt::default(),
            bootstrap_servers: None,
            producer: ClientProperties::new(),
            consumer: ClientProperties::new(),
        }
    }

    /// Configuration with default client settings for the given brokers.
    pub fn with_bootstrap_servers(
        topic: impl Into<String>,
        bootstrap_servers: &str,
    ) -> Result<Self, ConfigError> {
        Self::builder(topic)
            .bootstrap_servers(bootstrap_servers)
            .build()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn halt(&self) -> ReplayHalt {
        self.halt
    }

    pub fn producer(&self) -> &ClientProperties {
        &self.producer
    }

    pub fn consumer(&self) -> &ClientProperties {
        &self.consumer
    }

    pub(crate) fn set_poll_timeout(&mut self, timeout: Duration) -> Result<(), ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::ZeroPollTimeout);
        }
        self.poll_timeout = timeout;
        Ok(())
    }
}

/// Builder for [`ResumeConfig`].
#[derive(Debug, Clone)]
pub struct ResumeConfigBuilder {
    topic: String,
    poll_timeout: Duration,
    retry_count: u32,
    halt: ReplayHalt,
    bootstrap_servers: Option<String>,
    producer: ClientProperties,
    consumer: ClientProperties,
}

impl ResumeConfigBuilder {
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn retry_count(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }

    pub fn halt(mut self, halt: ReplayHalt) -> Self {
        self.halt = halt;
        self
    }

    /// Seeds both clients with the default properties for these brokers.
    ///
    /// Properties given through [`producer_property`](Self::producer_property)
    /// or [`consumer_property`](Self::consumer_property) take precedence.
    pub fn bootstrap_servers(mut self, servers: impl Into<String>) -> Self {
        self.bootstrap_servers = Some(servers.into());
        self
    }

    pub fn producer_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.producer.set(key, value);
        self
    }

    pub fn consumer_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.consumer.set(key, value);
        self
    }

    pub fn build(self) -> Result<ResumeConfig, ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::MissingTopic);
        }
        if self.poll_timeout.is_zero() {
            return Err(ConfigError::ZeroPollTimeout);
        }
        if self.retry_count == 0 {
            return Err(ConfigError::ZeroRetryCount);
        }

        let (producer, consumer) = match self.bootstrap_servers {
            Some(servers) => {
                let mut producer = ClientProperties::producer_defaults(&servers)?;
                let mut consumer = ClientProperties::consumer_defaults(&servers)?;
                for (k, v) in self.producer.iter() {
                    producer.set(k, v);
                }
                for (k, v) in self.consumer.iter() {
                    consumer.set(k, v);
                }
                (producer, consumer)
            }
            None => (self.producer, self.consumer),
        };

        Ok(ResumeConfig {
            topic: self.topic,
            poll_timeout: self.poll_timeout,
            retry_count: self.retry_count,
            halt: self.halt,
            producer,
            consumer,
        })
    }
}
