//! Abstract interface for a managed publish/subscribe broker.
//!
//! A [`Broker`] hands out [`Connection`]s by project name. A connection can look
//! up, create and delete topics and subscriptions, publish to a topic, and
//! receive from a subscription until a cancellation token fires.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Connections to a single broker project.
pub mod connection;

/// Messages delivered from subscriptions.
pub mod delivery;

pub use connection::Connection;
pub use delivery::{Delivery, DeliveryHandler};

use std::error::Error;
use std::fmt::{self, Debug, Display};

use async_trait::async_trait;

/// Coarse classification of broker failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BrokerErrorKind {
    /// The resource being created already exists.
    AlreadyExists,

    /// A topic, subscription or project name was rejected.
    InvalidName,

    /// The named resource does not exist.
    NotFound,

    /// The broker could not be reached or the request failed in transit.
    Transport,

    /// Anything else.
    Other,
}

impl Display for BrokerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists => write!(f, "already exists"),
            Self::InvalidName => write!(f, "invalid name"),
            Self::NotFound => write!(f, "not found"),
            Self::Transport => write!(f, "transport"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Marker trait for broker errors.
pub trait BrokerError: Debug + Error + Send + Sync + 'static {
    /// Classifies the error.
    fn kind(&self) -> BrokerErrorKind;
}

/// A factory for connections to a messaging backend.
#[async_trait]
pub trait Broker
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the broker and its connections.
    type Error: BrokerError;

    /// The connection type handed out by the broker.
    type Connection: Connection<Error = Self::Error>;

    /// Opens a new connection to the named project.
    ///
    /// Every call opens a fresh connection; there is no pooling and no retry.
    async fn connect(&self, connection_name: &str) -> Result<Self::Connection, Self::Error>;
}
