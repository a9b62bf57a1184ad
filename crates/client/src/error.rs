use crate::provision::ResourceKind;

use pubsub_demo_broker::BrokerError;
use thiserror::Error;

/// Errors from provisioning a topic or subscription.
#[derive(Debug, Error)]
pub enum ProvisionError<E>
where
    E: BrokerError,
{
    /// The existence check itself failed.
    #[error("failed to check whether {kind} {name} exists: {source}")]
    Check {
        /// Kind of resource being checked.
        kind: ResourceKind,

        /// Name of the resource.
        name: String,

        /// The broker error.
        source: E,
    },

    /// The resource was still missing after one create attempt.
    #[error("could not create {kind} {name}")]
    NotCreated {
        /// Kind of resource being created.
        kind: ResourceKind,

        /// Name of the resource.
        name: String,
    },
}

impl<E> ProvisionError<E>
where
    E: BrokerError,
{
    /// Kind of resource that failed.
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Check { kind, .. } | Self::NotCreated { kind, .. } => *kind,
        }
    }

    /// Name of the resource that failed.
    pub fn name(&self) -> &str {
        match self {
            Self::Check { name, .. } | Self::NotCreated { name, .. } => name,
        }
    }
}

/// Errors returned by the client.
#[derive(Debug, Error)]
pub enum Error<E>
where
    E: BrokerError,
{
    /// Opening a connection failed.
    #[error("failed to connect to {connection}: {source}")]
    Connect {
        /// Name the connection was opened for.
        connection: String,

        /// The broker error.
        source: E,
    },

    /// A topic or subscription could not be verified or created.
    #[error("failed to set up {kind}: {0}", kind = .0.kind())]
    Provision(#[from] ProvisionError<E>),

    /// Sending a message failed. The publisher is closed afterwards.
    #[error("failed to publish to topic {topic}: {source}")]
    Publish {
        /// Topic the message was sent to.
        topic: String,

        /// The broker error.
        source: E,
    },

    /// The receive stream ended abnormally.
    #[error("receiving from subscription {subscription} failed: {source}")]
    Receive {
        /// Subscription being received from.
        subscription: String,

        /// The broker error.
        source: E,
    },
}
