//! A small publish/subscribe client.
//!
//! [`PubSub::get_publisher`] hands out a [`Publisher`] for a topic and
//! [`PubSub::subscribe`] runs a receive loop that feeds every message to a
//! callback until the callback returns `true`. Both provision the topic (and
//! subscription) they need first, creating them if missing and tolerating a
//! concurrent creator.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod logging;
mod provision;
mod publisher;
mod subscriber;

pub use error::{Error, ProvisionError};
pub use logging::{
    LOG_LEVEL_ENV, LogBuffer, LogConfig, LogLevel, LogOutput, Logger, ParseLogLevelError,
    SharedWriter,
};
pub use provision::{
    Existence, ResourceKind, Subscription, Topic, ensure_subscription, ensure_topic,
};
pub use publisher::Publisher;

use bytes::Bytes;
use pubsub_demo_broker::{Broker, Connection};
use tracing::instrument::WithSubscriber;
use tracing::{debug, error};

/// Options for configuring a `PubSub` client.
#[derive(Clone, Debug)]
pub struct PubSubOptions<B>
where
    B: Broker,
{
    /// The broker to connect through.
    pub broker: B,

    /// Logging configuration.
    pub log: LogConfig,
}

/// Entry point for publishing and subscribing.
///
/// Every call opens its own connection; nothing is shared between publishers
/// and subscriptions.
#[derive(Clone, Debug)]
pub struct PubSub<B>
where
    B: Broker,
{
    broker: B,
    logger: Logger,
}

impl<B> PubSub<B>
where
    B: Broker,
{
    /// Creates a new client.
    #[must_use]
    pub fn new(PubSubOptions { broker, log }: PubSubOptions<B>) -> Self {
        let logger = Logger::new(&log);
        logger.in_scope(|| debug!("Created client with log level {}", log.level));

        Self { broker, logger }
    }

    /// The client's log sink.
    #[must_use]
    pub const fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Opens a connection and makes sure `topic_name` exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be opened or the topic cannot
    /// be provisioned. The connection is closed before a provisioning error is
    /// returned.
    pub async fn get_publisher(
        &self,
        connection_name: &str,
        topic_name: &str,
    ) -> Result<Publisher<B::Connection>, Error<B::Error>> {
        publisher::open(&self.broker, &self.logger, connection_name, topic_name)
            .with_subscriber(self.logger.dispatch().clone())
            .await
    }

    /// Receives from `subscription_id` on `topic_name`, calling `callback` with
    /// every payload until it returns `true`.
    ///
    /// Each message is acknowledged after the callback returns, whatever it
    /// returned. The subscription is deleted once the loop ends; the topic is
    /// left in place.
    ///
    /// # Errors
    ///
    /// Returns an error if setup fails, or [`Error::Receive`] if the receive
    /// stream fails. Cleanup runs before either is returned.
    pub async fn subscribe<F>(
        &self,
        connection_name: &str,
        topic_name: &str,
        subscription_id: &str,
        callback: F,
    ) -> Result<(), Error<B::Error>>
    where
        F: Fn(Bytes) -> bool + Send + Sync + 'static,
    {
        subscriber::subscribe(
            &self.broker,
            connection_name,
            topic_name,
            subscription_id,
            callback,
        )
        .with_subscriber(self.logger.dispatch().clone())
        .await
    }
}

async fn connect<B: Broker>(
    broker: &B,
    connection_name: &str,
) -> Result<B::Connection, Error<B::Error>> {
    match broker.connect(connection_name).await {
        Ok(connection) => {
            debug!("Connected to {connection_name}");
            Ok(connection)
        }
        Err(source) => {
            error!("Failed to connect to {connection_name}: {source}");
            Err(Error::Connect {
                connection: connection_name.to_string(),
                source,
            })
        }
    }
}

async fn close_connection<C: Connection>(connection: C) {
    let name = connection.name().to_string();

    debug!("Closing connection to {name}");
    if let Err(e) = connection.close().await {
        error!("Failed to close connection to {name}: {e}");
    }
}
