//! Error types for the resume strategy and the broker clients it drives.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while validating a [`ResumeConfig`](crate::config::ResumeConfig).
///
/// All of these are fatal to instance creation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The topic used to publish and replay positions was empty.
    #[error("the topic must not be empty")]
    MissingTopic,

    /// A poll attempt must be allowed to block for some time.
    #[error("the poll timeout must be greater than zero")]
    ZeroPollTimeout,

    /// At least one poll attempt is needed to read anything.
    #[error("the retry count must be at least 1")]
    ZeroRetryCount,

    /// No broker address was given for a client.
    #[error("bootstrap servers must not be empty")]
    MissingBootstrapServers,
}

/// Errors reported by a broker client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The client was already closed.
    #[error("client is closed")]
    Closed,

    /// The broker could not be reached or refused the request.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The client was asked to do something its current state does not allow.
    #[error("invalid client state: {0}")]
    InvalidState(String),

    /// Error bubbled up from the Kafka client library.
    #[error("kafka error: {0}")]
    Kafka(String),
}

/// Which of the two broker clients an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Producer,
    Consumer,
}

impl std::fmt::Display for ClientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientKind::Producer => f.write_str("producer"),
            ClientKind::Consumer => f.write_str("consumer"),
        }
    }
}

/// Errors returned by [`ResumeStrategy`](crate::strategy::ResumeStrategy).
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Replay was requested but the adapter cannot turn records back into positions.
    #[error("cannot load data for an adapter that is not deserializable")]
    NotDeserializable,

    /// The broker clients have not been constructed yet.
    #[error("the resume strategy has not been initialized")]
    NotInitialized,

    /// The strategy was stopped. A stopped strategy cannot be reused.
    #[error("the resume strategy has been stopped")]
    Stopped,

    /// Failure constructing one of the broker clients.
    #[error("failed to create the {client}: {source}")]
    ClientCreation {
        client: ClientKind,
        #[source]
        source: BrokerError,
    },

    /// A broker client operation failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}
