use crate::delivery::MemoryDelivery;
use crate::error::Error;
use crate::state::Project;
use crate::{MemoryBrokerOptions, validate_name};

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use pubsub_demo_broker::{Connection, DeliveryHandler};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::instrument::WithSubscriber;

/// A connection to one in-memory project.
#[derive(Debug)]
pub struct MemoryConnection {
    name: String,
    options: MemoryBrokerOptions,
    project: Arc<Project>,
}

impl MemoryConnection {
    pub(crate) const fn new(
        name: String,
        options: MemoryBrokerOptions,
        project: Arc<Project>,
    ) -> Self {
        Self {
            name,
            options,
            project,
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    type Error = Error;

    type Delivery = MemoryDelivery;

    fn name(&self) -> &str {
        &self.name
    }

    async fn topic_exists(&self, topic: &str) -> Result<bool, Self::Error> {
        validate_name(topic)?;

        Ok(self.project.topic_exists(topic).await)
    }

    async fn create_topic(&self, topic: &str) -> Result<(), Self::Error> {
        validate_name(topic)?;

        self.project.create_topic(topic).await
    }

    async fn delete_topic(&self, topic: &str) -> Result<(), Self::Error> {
        validate_name(topic)?;

        self.project.delete_topic(topic).await
    }

    async fn subscription_exists(&self, subscription: &str) -> Result<bool, Self::Error> {
        validate_name(subscription)?;

        Ok(self.project.subscription_exists(subscription).await)
    }

    async fn create_subscription(
        &self,
        subscription: &str,
        topic: &str,
    ) -> Result<(), Self::Error> {
        validate_name(subscription)?;
        validate_name(topic)?;

        self.project.create_subscription(subscription, topic).await
    }

    async fn delete_subscription(&self, subscription: &str) -> Result<(), Self::Error> {
        validate_name(subscription)?;

        self.project.delete_subscription(subscription).await
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<String, Self::Error> {
        validate_name(topic)?;

        let id = self.project.publish(topic, payload).await?;
        debug!("Published message {id} to topic {topic}");

        Ok(id)
    }

    async fn receive<X>(
        &self,
        subscription: &str,
        shutdown: CancellationToken,
        handler: X,
    ) -> Result<(), Self::Error>
    where
        X: DeliveryHandler<Self::Delivery>,
    {
        validate_name(subscription)?;

        let state = self
            .project
            .subscription(subscription)
            .await
            .ok_or_else(|| Error::SubscriptionNotFound(subscription.to_string()))?;

        let permits = Arc::new(Semaphore::new(self.options.max_outstanding_messages.max(1)));
        let tracker = TaskTracker::new();

        debug!("Receiving from subscription {subscription}");

        // Shutdown is always checked first so that a handler cancelling the
        // token stops the loop before another message is handed out.
        let result = loop {
            let permit = tokio::select! {
                biased;
                () = shutdown.cancelled() => break Ok(()),
                () = state.deleted().cancelled() => {
                    break Err(Error::SubscriptionNotFound(subscription.to_string()))
                }
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Ok(()),
                },
            };

            let message = tokio::select! {
                biased;
                () = shutdown.cancelled() => break Ok(()),
                () = state.deleted().cancelled() => {
                    break Err(Error::SubscriptionNotFound(subscription.to_string()))
                }
                message = state.next() => message,
            };

            let delivery = MemoryDelivery::new(message, Arc::clone(&state));
            let handler = handler.clone();
            tracker.spawn(
                async move {
                    handler.handle(delivery).await;
                    drop(permit);
                }
                .with_current_subscriber(),
            );
        };

        tracker.close();
        tracker.wait().await;

        debug!("Stopped receiving from subscription {subscription}");

        result
    }

    async fn close(self) -> Result<(), Self::Error> {
        debug!("Closed connection to {}", self.name);

        Ok(())
    }
}
