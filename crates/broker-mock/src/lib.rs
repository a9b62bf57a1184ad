//! Mock implementation of the broker interface for testing purposes.
//!
//! Existence checks and creates can be scripted call by call; once a script
//! runs out the mock answers from the topics and subscriptions it actually
//! holds. Every side effect is recorded so tests can assert on it afterwards.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use pubsub_demo_broker::{Broker, Connection, Delivery, DeliveryHandler};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Scripts {
    topic_exists: VecDeque<Result<bool, Error>>,
    create_topic: VecDeque<Result<(), Error>>,
    subscription_exists: VecDeque<Result<bool, Error>>,
    create_subscription: VecDeque<Result<(), Error>>,
}

#[derive(Debug, Default)]
struct Failures {
    connect: Option<Error>,
    publish: Option<Error>,
    receive: Option<Error>,
    delete_topic: Option<Error>,
    delete_subscription: Option<Error>,
}

#[derive(Debug, Default)]
struct Calls {
    connects: usize,
    closes: usize,
    topic_exists: usize,
    create_topic: usize,
    subscription_exists: usize,
    create_subscription: usize,
}

#[derive(Debug, Default)]
struct State {
    scripts: Scripts,
    failures: Failures,
    calls: Calls,

    topics: HashSet<String>,
    // subscription name -> topic name
    subscriptions: HashMap<String, String>,

    next_message_id: u64,
    queued: VecDeque<Bytes>,
    delivered: Vec<Bytes>,
    acked: Vec<Bytes>,
    unacked: Vec<Bytes>,
    published: Vec<(String, Bytes)>,
    deleted_topics: Vec<String>,
    deleted_subscriptions: Vec<String>,
}

impl State {
    fn next_id(&mut self) -> String {
        self.next_message_id += 1;
        self.next_message_id.to_string()
    }
}

/// Mock implementation of the broker interface.
#[derive(Clone, Debug, Default)]
pub struct MockBroker {
    state: Arc<Mutex<State>>,
}

impl MockBroker {
    /// Create a new mock broker with no resources and no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an existing topic.
    #[must_use]
    pub fn with_topic(self, topic: &str) -> Self {
        self.state.lock().topics.insert(topic.to_string());
        self
    }

    /// Adds an existing subscription bound to `topic`.
    #[must_use]
    pub fn with_subscription(self, subscription: &str, topic: &str) -> Self {
        self.state
            .lock()
            .subscriptions
            .insert(subscription.to_string(), topic.to_string());
        self
    }

    /// Queues a message for the next receive call.
    #[must_use]
    pub fn with_message(self, payload: impl Into<Bytes>) -> Self {
        self.state.lock().queued.push_back(payload.into());
        self
    }

    /// Scripts the answers of the next topic existence checks, in order.
    pub fn script_topic_exists(&self, answers: impl IntoIterator<Item = Result<bool, Error>>) {
        self.state.lock().scripts.topic_exists.extend(answers);
    }

    /// Scripts the results of the next topic creates, in order.
    ///
    /// A scripted `Ok` adds the topic, a scripted `Err` leaves state untouched.
    pub fn script_create_topic(&self, results: impl IntoIterator<Item = Result<(), Error>>) {
        self.state.lock().scripts.create_topic.extend(results);
    }

    /// Scripts the answers of the next subscription existence checks, in order.
    pub fn script_subscription_exists(
        &self,
        answers: impl IntoIterator<Item = Result<bool, Error>>,
    ) {
        self.state.lock().scripts.subscription_exists.extend(answers);
    }

    /// Scripts the results of the next subscription creates, in order.
    pub fn script_create_subscription(
        &self,
        results: impl IntoIterator<Item = Result<(), Error>>,
    ) {
        self.state.lock().scripts.create_subscription.extend(results);
    }

    /// Makes every connect call fail.
    pub fn fail_connect(&self, error: Error) {
        self.state.lock().failures.connect = Some(error);
    }

    /// Makes every publish call fail.
    pub fn fail_publish(&self, error: Error) {
        self.state.lock().failures.publish = Some(error);
    }

    /// Makes receive fail once the queued messages have been handed out.
    pub fn fail_receive(&self, error: Error) {
        self.state.lock().failures.receive = Some(error);
    }

    /// Makes every topic delete fail.
    pub fn fail_delete_topic(&self, error: Error) {
        self.state.lock().failures.delete_topic = Some(error);
    }

    /// Makes every subscription delete fail.
    pub fn fail_delete_subscription(&self, error: Error) {
        self.state.lock().failures.delete_subscription = Some(error);
    }

    /// Number of connections opened.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.state.lock().calls.connects
    }

    /// Number of connections closed.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.state.lock().calls.closes
    }

    /// Number of topic existence checks made.
    #[must_use]
    pub fn topic_exists_calls(&self) -> usize {
        self.state.lock().calls.topic_exists
    }

    /// Number of topic creates attempted.
    #[must_use]
    pub fn create_topic_calls(&self) -> usize {
        self.state.lock().calls.create_topic
    }

    /// Number of subscription existence checks made.
    #[must_use]
    pub fn subscription_exists_calls(&self) -> usize {
        self.state.lock().calls.subscription_exists
    }

    /// Number of subscription creates attempted.
    #[must_use]
    pub fn create_subscription_calls(&self) -> usize {
        self.state.lock().calls.create_subscription
    }

    /// Whether the topic currently exists.
    #[must_use]
    pub fn has_topic(&self, topic: &str) -> bool {
        self.state.lock().topics.contains(topic)
    }

    /// Whether the subscription currently exists.
    #[must_use]
    pub fn has_subscription(&self, subscription: &str) -> bool {
        self.state.lock().subscriptions.contains_key(subscription)
    }

    /// Payloads handed to a receive handler, in order.
    #[must_use]
    pub fn delivered(&self) -> Vec<Bytes> {
        self.state.lock().delivered.clone()
    }

    /// Payloads acknowledged, in order.
    #[must_use]
    pub fn acked(&self) -> Vec<Bytes> {
        self.state.lock().acked.clone()
    }

    /// Payloads whose delivery was dropped without an acknowledgement.
    #[must_use]
    pub fn unacked(&self) -> Vec<Bytes> {
        self.state.lock().unacked.clone()
    }

    /// Payloads still waiting to be delivered.
    #[must_use]
    pub fn queued(&self) -> Vec<Bytes> {
        self.state.lock().queued.iter().cloned().collect()
    }

    /// Successful publishes as `(topic, payload)` pairs.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.state.lock().published.clone()
    }

    /// Topics deleted, in order.
    #[must_use]
    pub fn deleted_topics(&self) -> Vec<String> {
        self.state.lock().deleted_topics.clone()
    }

    /// Subscriptions deleted, in order.
    #[must_use]
    pub fn deleted_subscriptions(&self) -> Vec<String> {
        self.state.lock().deleted_subscriptions.clone()
    }
}

#[async_trait]
impl Broker for MockBroker {
    type Error = Error;

    type Connection = MockConnection;

    async fn connect(&self, connection_name: &str) -> Result<Self::Connection, Self::Error> {
        let mut state = self.state.lock();
        if let Some(error) = state.failures.connect.clone() {
            return Err(error);
        }
        state.calls.connects += 1;
        drop(state);

        Ok(MockConnection {
            name: connection_name.to_string(),
            state: Arc::clone(&self.state),
        })
    }
}

/// Connection handed out by [`MockBroker`].
#[derive(Debug)]
pub struct MockConnection {
    name: String,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Connection for MockConnection {
    type Error = Error;

    type Delivery = MockDelivery;

    fn name(&self) -> &str {
        &self.name
    }

    async fn topic_exists(&self, topic: &str) -> Result<bool, Self::Error> {
        let mut state = self.state.lock();
        state.calls.topic_exists += 1;

        match state.scripts.topic_exists.pop_front() {
            Some(answer) => answer,
            None => Ok(state.topics.contains(topic)),
        }
    }

    async fn create_topic(&self, topic: &str) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        state.calls.create_topic += 1;

        match state.scripts.create_topic.pop_front() {
            Some(Err(error)) => Err(error),
            Some(Ok(())) => {
                state.topics.insert(topic.to_string());
                Ok(())
            }
            None if state.topics.contains(topic) => Err(Error::AlreadyExists(topic.to_string())),
            None => {
                state.topics.insert(topic.to_string());
                Ok(())
            }
        }
    }

    async fn delete_topic(&self, topic: &str) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        if let Some(error) = state.failures.delete_topic.clone() {
            return Err(error);
        }
        if !state.topics.remove(topic) {
            return Err(Error::NotFound(topic.to_string()));
        }
        state.deleted_topics.push(topic.to_string());

        Ok(())
    }

    async fn subscription_exists(&self, subscription: &str) -> Result<bool, Self::Error> {
        let mut state = self.state.lock();
        state.calls.subscription_exists += 1;

        match state.scripts.subscription_exists.pop_front() {
            Some(answer) => answer,
            None => Ok(state.subscriptions.contains_key(subscription)),
        }
    }

    async fn create_subscription(
        &self,
        subscription: &str,
        topic: &str,
    ) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        state.calls.create_subscription += 1;

        match state.scripts.create_subscription.pop_front() {
            Some(Err(error)) => Err(error),
            Some(Ok(())) => {
                state
                    .subscriptions
                    .insert(subscription.to_string(), topic.to_string());
                Ok(())
            }
            None if state.subscriptions.contains_key(subscription) => {
                Err(Error::AlreadyExists(subscription.to_string()))
            }
            None => {
                state
                    .subscriptions
                    .insert(subscription.to_string(), topic.to_string());
                Ok(())
            }
        }
    }

    async fn delete_subscription(&self, subscription: &str) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        if let Some(error) = state.failures.delete_subscription.clone() {
            return Err(error);
        }
        if state.subscriptions.remove(subscription).is_none() {
            return Err(Error::NotFound(subscription.to_string()));
        }
        state.deleted_subscriptions.push(subscription.to_string());

        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<String, Self::Error> {
        let mut state = self.state.lock();
        if let Some(error) = state.failures.publish.clone() {
            return Err(error);
        }
        if !state.topics.contains(topic) {
            return Err(Error::NotFound(topic.to_string()));
        }
        state.published.push((topic.to_string(), payload));

        Ok(state.next_id())
    }

    /// Hands queued messages to the handler one at a time, checking `shutdown`
    /// before each. Once the queue is empty it fails with the scripted receive
    /// error, if any, or waits for `shutdown`.
    async fn receive<X>(
        &self,
        _subscription: &str,
        shutdown: CancellationToken,
        handler: X,
    ) -> Result<(), Self::Error>
    where
        X: DeliveryHandler<Self::Delivery>,
    {
        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            let next = {
                let mut state = self.state.lock();
                state.queued.pop_front().map(|payload| {
                    state.delivered.push(payload.clone());
                    (state.next_id(), payload)
                })
            };

            match next {
                Some((id, payload)) => {
                    handler
                        .handle(MockDelivery {
                            acked: false,
                            id,
                            payload,
                            state: Arc::clone(&self.state),
                        })
                        .await;
                }
                None => break,
            }
        }

        let failure = self.state.lock().failures.receive.take();
        if let Some(error) = failure {
            return Err(error);
        }

        shutdown.cancelled().await;

        Ok(())
    }

    async fn close(self) -> Result<(), Self::Error> {
        self.state.lock().calls.closes += 1;

        Ok(())
    }
}

/// Delivery handed out by [`MockConnection::receive`].
pub struct MockDelivery {
    acked: bool,
    id: String,
    payload: Bytes,
    state: Arc<Mutex<State>>,
}

impl Debug for MockDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockDelivery")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

impl Delivery for MockDelivery {
    fn id(&self) -> &str {
        &self.id
    }

    fn payload(&self) -> &Bytes {
        &self.payload
    }

    fn ack(mut self) {
        self.acked = true;
        self.state.lock().acked.push(self.payload.clone());
    }
}

impl Drop for MockDelivery {
    fn drop(&mut self) {
        if !self.acked {
            self.state.lock().unacked.push(self.payload.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use assert_matches::assert_matches;
    use tokio::time::timeout;

    #[derive(Clone)]
    struct AckEvery;

    #[async_trait]
    impl DeliveryHandler<MockDelivery> for AckEvery {
        async fn handle(&self, delivery: MockDelivery) {
            delivery.ack();
        }
    }

    #[tokio::test]
    async fn test_scripts_take_precedence() {
        let broker = MockBroker::new().with_topic("topic");
        broker.script_topic_exists([Ok(false), Err(Error::Transport("down".to_string()))]);

        let connection = broker.connect("project").await.unwrap();

        assert!(!connection.topic_exists("topic").await.unwrap());
        assert_matches!(
            connection.topic_exists("topic").await,
            Err(Error::Transport(_))
        );
        // Script exhausted.
        assert!(connection.topic_exists("topic").await.unwrap());
        assert_eq!(broker.topic_exists_calls(), 3);
    }

    #[tokio::test]
    async fn test_scripted_create_failure_leaves_state() {
        let broker = MockBroker::new();
        broker.script_create_topic([Err(Error::MockError("boom".to_string()))]);

        let connection = broker.connect("project").await.unwrap();

        assert!(connection.create_topic("topic").await.is_err());
        assert!(!broker.has_topic("topic"));

        connection.create_topic("topic").await.unwrap();
        assert_matches!(
            connection.create_topic("topic").await,
            Err(Error::AlreadyExists(_))
        );
        assert_eq!(broker.create_topic_calls(), 3);
    }

    #[tokio::test]
    async fn test_receive_records_acks() {
        let broker = MockBroker::new()
            .with_message("a")
            .with_message("b");
        broker.fail_receive(Error::Transport("stream reset".to_string()));

        let connection = broker.connect("project").await.unwrap();
        let result = timeout(
            Duration::from_secs(1),
            connection.receive("subscription", CancellationToken::new(), AckEvery),
        )
        .await
        .unwrap();

        assert_matches!(result, Err(Error::Transport(_)));
        assert_eq!(broker.acked(), vec!["a", "b"]);
        assert!(broker.unacked().is_empty());
        assert!(broker.queued().is_empty());
    }

    #[tokio::test]
    async fn test_connect_and_close_counts() {
        let broker = MockBroker::new();

        let connection = broker.connect("project").await.unwrap();
        assert_eq!(connection.name(), "project");
        connection.close().await.unwrap();

        broker.fail_connect(Error::Transport("unreachable".to_string()));
        assert!(broker.connect("project").await.is_err());

        assert_eq!(broker.connects(), 1);
        assert_eq!(broker.closes(), 1);
    }

    #[test]
    fn test_error_kinds() {
        use pubsub_demo_broker::{BrokerError, BrokerErrorKind};

        let kinds: Vec<_> = [
            Error::AlreadyExists("topic".to_string()),
            Error::MockError("quota".to_string()),
            Error::NotFound("topic".to_string()),
            Error::Transport("reset".to_string()),
        ]
        .iter()
        .map(BrokerError::kind)
        .collect();

        assert_eq!(
            kinds,
            vec![
                BrokerErrorKind::AlreadyExists,
                BrokerErrorKind::Other,
                BrokerErrorKind::NotFound,
                BrokerErrorKind::Transport,
            ]
        );
        assert_eq!(BrokerErrorKind::AlreadyExists.to_string(), "already exists");
    }
}
