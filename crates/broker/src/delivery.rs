use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

/// A message handed out by a subscription.
///
/// Deliveries that are dropped without [`Delivery::ack`] are eligible for
/// redelivery.
pub trait Delivery
where
    Self: Debug + Send + Sync + 'static,
{
    /// The broker-assigned message id.
    fn id(&self) -> &str;

    /// The message payload.
    fn payload(&self) -> &Bytes;

    /// Acknowledges the message so the broker will not redeliver it.
    fn ack(self);
}

/// Processes deliveries for a receiving connection.
#[async_trait]
pub trait DeliveryHandler<D>
where
    Self: Clone + Send + Sync + 'static,
    D: Delivery,
{
    /// Handles one delivery. The handler owns acknowledging it.
    async fn handle(&self, delivery: D);
}
