use crate::error::Error;
use crate::logging::Logger;
use crate::provision::{Topic, ensure_topic};
use crate::{close_connection, connect};

use bytes::Bytes;
use pubsub_demo_broker::{Broker, Connection};
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, trace};

#[derive(Debug)]
struct Session<C> {
    connection: C,
    topic: Topic,
}

/// A publish handle for one topic.
///
/// Ready until [`Publisher::publish`] is given `None` or a send fails; after
/// that the connection is closed, the topic is deleted and every further
/// call is a no-op returning `Ok(())`.
#[derive(Debug)]
pub struct Publisher<C>
where
    C: Connection,
{
    logger: Logger,
    session: Option<Session<C>>,
}

pub(crate) async fn open<B: Broker>(
    broker: &B,
    logger: &Logger,
    connection_name: &str,
    topic_name: &str,
) -> Result<Publisher<B::Connection>, Error<B::Error>> {
    trace!("get_publisher(connection={connection_name}, topic={topic_name})");

    let connection = connect(broker, connection_name).await?;

    match ensure_topic(&connection, topic_name).await {
        Ok(topic) => {
            debug!("Retrieved topic {}", topic.name());
            Ok(Publisher {
                logger: logger.clone(),
                session: Some(Session { connection, topic }),
            })
        }
        Err(e) => {
            error!("Failed to provision topic {topic_name}: {e}");
            close_connection(connection).await;
            Err(e.into())
        }
    }
}

impl<C> Publisher<C>
where
    C: Connection,
{
    /// Sends `Some(payload)` and waits for the broker to accept it, or shuts
    /// the publisher down on `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Publish`] if the broker rejects the message. The
    /// publisher releases its resources before returning the error.
    pub async fn publish(&mut self, payload: Option<Bytes>) -> Result<(), Error<C::Error>> {
        let dispatch = self.logger.dispatch().clone();

        self.send(payload).with_subscriber(dispatch).await
    }

    /// Same as `publish(None)`.
    pub async fn shutdown(&mut self) {
        let dispatch = self.logger.dispatch().clone();

        self.release().with_subscriber(dispatch).await;
    }

    /// Whether the publisher has released its resources.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.session.is_none()
    }

    /// The topic being published to, while ready.
    #[must_use]
    pub fn topic(&self) -> Option<&Topic> {
        self.session.as_ref().map(|session| &session.topic)
    }

    async fn send(&mut self, payload: Option<Bytes>) -> Result<(), Error<C::Error>> {
        let Some(payload) = payload else {
            trace!("publish(None)");
            self.release().await;
            return Ok(());
        };

        let Some(session) = &self.session else {
            trace!("publish on closed publisher ignored");
            return Ok(());
        };

        let topic = session.topic.name().to_string();
        trace!("publish(topic={topic}, {} bytes)", payload.len());

        let result = session.connection.publish(&topic, payload).await;
        match result {
            Ok(id) => {
                debug!("Published message {id} to topic {topic}");
                Ok(())
            }
            Err(source) => {
                error!("Failed to publish to topic {topic}: {source}");
                self.release().await;
                Err(Error::Publish { topic, source })
            }
        }
    }

    async fn release(&mut self) {
        let Some(Session { connection, topic }) = self.session.take() else {
            return;
        };

        debug!("Deleting topic {}", topic.name());
        if let Err(e) = connection.delete_topic(topic.name()).await {
            error!("Failed to delete topic {}: {e}", topic.name());
        }

        close_connection(connection).await;
    }
}

impl<C> Drop for Publisher<C>
where
    C: Connection,
{
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            self.logger.in_scope(|| {
                error!(
                    "Publisher for topic {} dropped without shutdown; connection and topic were not released",
                    session.topic.name()
                );
            });
        }
    }
}
