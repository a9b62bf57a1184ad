use crate::BrokerError;
use crate::delivery::{Delivery, DeliveryHandler};

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// A connection to one broker project.
///
/// A connection is owned by exactly one caller and closed exactly once, which
/// is why [`Connection::close`] consumes it.
#[async_trait]
pub trait Connection
where
    Self: Debug + Send + Sync + 'static,
{
    /// The error type for the connection.
    type Error: BrokerError;

    /// The message type delivered by [`Connection::receive`].
    type Delivery: Delivery;

    /// The project name this connection was opened for.
    fn name(&self) -> &str;

    /// Checks whether the named topic exists.
    async fn topic_exists(&self, topic: &str) -> Result<bool, Self::Error>;

    /// Creates the named topic.
    ///
    /// Fails with [`crate::BrokerErrorKind::AlreadyExists`] if it is already there.
    async fn create_topic(&self, topic: &str) -> Result<(), Self::Error>;

    /// Deletes the named topic. Subscriptions on it are detached, not deleted.
    async fn delete_topic(&self, topic: &str) -> Result<(), Self::Error>;

    /// Checks whether the named subscription exists.
    async fn subscription_exists(&self, subscription: &str) -> Result<bool, Self::Error>;

    /// Creates the named subscription bound to `topic`.
    async fn create_subscription(&self, subscription: &str, topic: &str)
    -> Result<(), Self::Error>;

    /// Deletes the named subscription.
    async fn delete_subscription(&self, subscription: &str) -> Result<(), Self::Error>;

    /// Publishes a payload to a topic and waits for the broker to accept it.
    ///
    /// Returns the broker-assigned message id.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<String, Self::Error>;

    /// Receives from a subscription, passing every delivery to `handler`.
    ///
    /// Returns `Ok(())` once `shutdown` is cancelled and all handler calls that
    /// were already started have finished. Returns an error if the stream of
    /// deliveries fails on its own. The handler may be invoked concurrently
    /// for different deliveries and may cancel `shutdown` itself.
    async fn receive<X>(
        &self,
        subscription: &str,
        shutdown: CancellationToken,
        handler: X,
    ) -> Result<(), Self::Error>
    where
        X: DeliveryHandler<Self::Delivery>;

    /// Closes the connection.
    async fn close(self) -> Result<(), Self::Error>;
}
