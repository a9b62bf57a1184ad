use pubsub_demo_broker::{BrokerError, BrokerErrorKind};
use thiserror::Error;

/// Errors returned by the in-memory broker.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// A project, topic or subscription name was rejected.
    #[error("invalid name {0:?} - must be non-empty and must not contain '/'")]
    InvalidName(String),

    /// The subscription already exists.
    #[error("subscription {0} already exists")]
    SubscriptionExists(String),

    /// The subscription does not exist.
    #[error("subscription {0} not found")]
    SubscriptionNotFound(String),

    /// The topic already exists.
    #[error("topic {0} already exists")]
    TopicExists(String),

    /// The topic does not exist.
    #[error("topic {0} not found")]
    TopicNotFound(String),
}

impl BrokerError for Error {
    fn kind(&self) -> BrokerErrorKind {
        match self {
            Self::InvalidName(_) => BrokerErrorKind::InvalidName,
            Self::SubscriptionExists(_) | Self::TopicExists(_) => BrokerErrorKind::AlreadyExists,
            Self::SubscriptionNotFound(_) | Self::TopicNotFound(_) => BrokerErrorKind::NotFound,
        }
    }
}
