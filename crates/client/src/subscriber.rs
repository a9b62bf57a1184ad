use crate::error::Error;
use crate::provision::{ensure_subscription, ensure_topic};
use crate::{close_connection, connect};

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use pubsub_demo_broker::{Broker, Connection, Delivery, DeliveryHandler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// Hands each payload to the user callback, acknowledges it, then cancels
/// `shutdown` if the callback asked to stop.
///
/// Handlers that start after the stop skip the callback and leave their
/// delivery unacknowledged. Callbacks already running when another one asks
/// to stop still finish and are acknowledged, so with several outstanding
/// messages the callback may run more than once after returning `true`.
pub(crate) struct CallbackHandler<F> {
    callback: Arc<F>,
    shutdown: CancellationToken,
}

impl<F> Clone for CallbackHandler<F> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
            shutdown: self.shutdown.clone(),
        }
    }
}

#[async_trait]
impl<D, F> DeliveryHandler<D> for CallbackHandler<F>
where
    D: Delivery,
    F: Fn(Bytes) -> bool + Send + Sync + 'static,
{
    async fn handle(&self, delivery: D) {
        // Left unacknowledged so the broker redelivers it to the next receiver.
        if self.shutdown.is_cancelled() {
            trace!("Skipping message {} received after stop", delivery.id());
            return;
        }

        debug!(
            "Received message {} ({} bytes)",
            delivery.id(),
            delivery.payload().len()
        );

        let stop = (self.callback)(delivery.payload().clone());
        delivery.ack();

        if stop {
            debug!("Callback requested stop");
            self.shutdown.cancel();
        }
    }
}

pub(crate) async fn subscribe<B, F>(
    broker: &B,
    connection_name: &str,
    topic_name: &str,
    subscription_id: &str,
    callback: F,
) -> Result<(), Error<B::Error>>
where
    B: Broker,
    F: Fn(Bytes) -> bool + Send + Sync + 'static,
{
    trace!(
        "subscribe(connection={connection_name}, topic={topic_name}, subscription={subscription_id})"
    );

    let connection = connect(broker, connection_name).await?;

    let topic = match ensure_topic(&connection, topic_name).await {
        Ok(topic) => topic,
        Err(e) => {
            error!("Failed to provision topic {topic_name}: {e}");
            close_connection(connection).await;
            return Err(e.into());
        }
    };
    debug!("Retrieved topic {}", topic.name());

    let subscription = match ensure_subscription(&connection, &topic, subscription_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            error!("Failed to provision subscription {subscription_id}: {e}");
            close_connection(connection).await;
            return Err(e.into());
        }
    };
    debug!(
        "Subscription {} ready on topic {}",
        subscription.name(),
        subscription.topic()
    );

    let shutdown = CancellationToken::new();
    let handler = CallbackHandler {
        callback: Arc::new(callback),
        shutdown: shutdown.clone(),
    };

    debug!("Receiving from subscription {}", subscription.name());
    let result = connection
        .receive(subscription.name(), shutdown.clone(), handler)
        .await;
    shutdown.cancel();

    if let Err(e) = &result {
        error!("Receive from subscription {} failed: {e}", subscription.name());
    }

    debug!("Deleting subscription {}", subscription.name());
    if let Err(e) = connection.delete_subscription(subscription.name()).await {
        error!("Failed to delete subscription {}: {e}", subscription.name());
    }

    close_connection(connection).await;

    result.map_err(|source| Error::Receive {
        subscription: subscription.name().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;
    use pubsub_demo_broker_memory::{MemoryBroker, MemoryBrokerOptions, MemoryConnection};
    use tokio::time::timeout;

    async fn setup(max_outstanding_messages: usize) -> (MemoryBroker, MemoryConnection) {
        let broker = MemoryBroker::new(MemoryBrokerOptions {
            max_outstanding_messages,
        });
        let connection = broker.connect("project").await.unwrap();
        connection.create_topic("topic").await.unwrap();
        connection.create_subscription("sub", "topic").await.unwrap();

        for payload in ["a", "b", "c"] {
            connection
                .publish("topic", Bytes::from(payload))
                .await
                .unwrap();
        }

        (broker, connection)
    }

    fn callback_handler<F>(callback: F) -> (CallbackHandler<F>, CancellationToken) {
        let shutdown = CancellationToken::new();

        (
            CallbackHandler {
                callback: Arc::new(callback),
                shutdown: shutdown.clone(),
            },
            shutdown,
        )
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_deliveries_after_stop_are_left_for_redelivery() {
        let _ = tracing_subscriber::fmt::try_init();

        let (broker, connection) = setup(3).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (handler, shutdown) = callback_handler(move |_payload: Bytes| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        // All three handlers are spawned before the first one runs, so the
        // second and third see the stop and skip the callback.
        timeout(
            Duration::from_secs(1),
            connection.receive("sub", shutdown, handler),
        )
        .await
        .expect("receive did not stop")
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.acknowledged("project", "sub").await, Some(1));
        assert_eq!(broker.pending("project", "sub").await, Some(2));

        // The skipped messages come back to the next receiver in order.
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let (handler, shutdown) = callback_handler(move |payload: Bytes| {
            let stop = payload == "c";
            record.lock().push(payload);
            stop
        });

        timeout(
            Duration::from_secs(1),
            connection.receive("sub", shutdown, handler),
        )
        .await
        .expect("receive did not stop")
        .unwrap();

        assert_eq!(*seen.lock(), vec!["b", "c"]);
        assert_eq!(broker.acknowledged("project", "sub").await, Some(3));
        assert_eq!(broker.pending("project", "sub").await, Some(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_callback_run_is_acknowledged() {
        let (broker, connection) = setup(3).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (handler, shutdown) = callback_handler(move |_payload: Bytes| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        timeout(
            Duration::from_secs(1),
            connection.receive("sub", shutdown, handler),
        )
        .await
        .expect("receive did not stop")
        .unwrap();

        // Concurrent callbacks may all run before the stop lands.
        let calls = calls.load(Ordering::SeqCst);
        assert!((1..=3).contains(&calls), "callback ran {calls} times");

        let acknowledged = broker.acknowledged("project", "sub").await.unwrap();
        let pending = broker.pending("project", "sub").await.unwrap();
        assert_eq!(acknowledged, calls as u64);
        assert_eq!(acknowledged + pending as u64, 3);
    }
}
