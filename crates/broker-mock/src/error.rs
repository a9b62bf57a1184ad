//! Error types for the mock broker.

use pubsub_demo_broker::{BrokerError, BrokerErrorKind};
use thiserror::Error;

/// Error type for the mock broker.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Returned by a create call for a resource that is already there.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// A scripted failure with no particular classification.
    #[error("mock broker error: {0}")]
    MockError(String),

    /// Returned when the named resource does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A scripted failure reaching the broker.
    #[error("transport error: {0}")]
    Transport(String),
}

impl BrokerError for Error {
    fn kind(&self) -> BrokerErrorKind {
        match self {
            Self::AlreadyExists(_) => BrokerErrorKind::AlreadyExists,
            Self::MockError(_) => BrokerErrorKind::Other,
            Self::NotFound(_) => BrokerErrorKind::NotFound,
            Self::Transport(_) => BrokerErrorKind::Transport,
        }
    }
}
