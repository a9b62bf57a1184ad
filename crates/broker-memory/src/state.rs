use crate::error::Error;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A message waiting in a subscription queue.
#[derive(Clone, Debug)]
pub struct StoredMessage {
    // Publish order within the project. Queues stay sorted by it.
    pub sequence: u64,
    pub id: String,
    pub payload: Bytes,
    pub delivery_attempt: u32,
}

/// Per-subscription queue shared by every connection receiving from it.
#[derive(Debug)]
pub struct SubscriptionState {
    name: String,
    topic: parking_lot::Mutex<Option<String>>,
    queue: parking_lot::Mutex<VecDeque<StoredMessage>>,
    notify: Notify,
    deleted: CancellationToken,
    acknowledged: AtomicU64,
}

impl SubscriptionState {
    fn new(name: String, topic: String) -> Self {
        Self {
            name,
            topic: parking_lot::Mutex::new(Some(topic)),
            queue: parking_lot::Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            deleted: CancellationToken::new(),
            acknowledged: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Token cancelled once the subscription is deleted.
    pub const fn deleted(&self) -> &CancellationToken {
        &self.deleted
    }

    pub fn acknowledged(&self) -> u64 {
        self.acknowledged.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    fn enqueue(&self, message: StoredMessage) {
        self.queue.lock().push_back(message);
        self.notify.notify_one();
    }

    /// Puts an unacknowledged message back ahead of every later-published
    /// message, so several redeliveries keep their publish order.
    pub fn redeliver(&self, mut message: StoredMessage) {
        debug!(
            "Redelivering message {} on subscription {}",
            message.id, self.name
        );
        message.delivery_attempt += 1;
        let mut queue = self.queue.lock();
        let index = queue.partition_point(|queued| queued.sequence < message.sequence);
        queue.insert(index, message);
        drop(queue);
        self.notify.notify_one();
    }

    pub fn record_ack(&self) {
        self.acknowledged.fetch_add(1, Ordering::SeqCst);
    }

    /// Waits for the next queued message.
    pub async fn next(&self) -> StoredMessage {
        loop {
            let notified = self.notify.notified();
            if let Some(message) = self.queue.lock().pop_front() {
                return message;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Default)]
struct Resources {
    // topic name -> names of subscriptions bound to it
    topics: HashMap<String, HashSet<String>>,
    subscriptions: HashMap<String, Arc<SubscriptionState>>,
}

/// All topics and subscriptions belonging to one project name.
#[derive(Debug, Default)]
pub struct Project {
    next_message_id: AtomicU64,
    resources: Mutex<Resources>,
}

impl Project {
    pub async fn topic_exists(&self, topic: &str) -> bool {
        self.resources.lock().await.topics.contains_key(topic)
    }

    pub async fn create_topic(&self, topic: &str) -> Result<(), Error> {
        let mut resources = self.resources.lock().await;
        if resources.topics.contains_key(topic) {
            return Err(Error::TopicExists(topic.to_string()));
        }
        resources.topics.insert(topic.to_string(), HashSet::new());
        drop(resources);

        debug!("Created topic {topic}");
        Ok(())
    }

    pub async fn delete_topic(&self, topic: &str) -> Result<(), Error> {
        let mut resources = self.resources.lock().await;
        let bound = resources
            .topics
            .remove(topic)
            .ok_or_else(|| Error::TopicNotFound(topic.to_string()))?;

        for name in bound {
            if let Some(subscription) = resources.subscriptions.get(&name) {
                *subscription.topic.lock() = None;
            }
        }
        drop(resources);

        debug!("Deleted topic {topic}");
        Ok(())
    }

    pub async fn subscription_exists(&self, subscription: &str) -> bool {
        self.resources
            .lock()
            .await
            .subscriptions
            .contains_key(subscription)
    }

    pub async fn create_subscription(&self, subscription: &str, topic: &str) -> Result<(), Error> {
        let mut resources = self.resources.lock().await;
        if resources.subscriptions.contains_key(subscription) {
            return Err(Error::SubscriptionExists(subscription.to_string()));
        }
        let bound = resources
            .topics
            .get_mut(topic)
            .ok_or_else(|| Error::TopicNotFound(topic.to_string()))?;
        bound.insert(subscription.to_string());
        resources.subscriptions.insert(
            subscription.to_string(),
            Arc::new(SubscriptionState::new(
                subscription.to_string(),
                topic.to_string(),
            )),
        );
        drop(resources);

        debug!("Created subscription {subscription} on topic {topic}");
        Ok(())
    }

    pub async fn delete_subscription(&self, subscription: &str) -> Result<(), Error> {
        let mut resources = self.resources.lock().await;
        let state = resources
            .subscriptions
            .remove(subscription)
            .ok_or_else(|| Error::SubscriptionNotFound(subscription.to_string()))?;

        let topic = state.topic.lock().take();
        if let Some(bound) = topic.and_then(|topic| resources.topics.get_mut(&topic)) {
            bound.remove(subscription);
        }
        drop(resources);

        state.deleted.cancel();
        debug!("Deleted subscription {subscription}");
        Ok(())
    }

    pub async fn subscription(&self, subscription: &str) -> Option<Arc<SubscriptionState>> {
        self.resources
            .lock()
            .await
            .subscriptions
            .get(subscription)
            .cloned()
    }

    /// Fans the payload out to every subscription bound to the topic.
    pub async fn publish(&self, topic: &str, payload: Bytes) -> Result<String, Error> {
        let resources = self.resources.lock().await;
        let bound = resources
            .topics
            .get(topic)
            .ok_or_else(|| Error::TopicNotFound(topic.to_string()))?;

        let sequence = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        let id = sequence.to_string();

        for name in bound {
            if let Some(subscription) = resources.subscriptions.get(name) {
                subscription.enqueue(StoredMessage {
                    sequence,
                    id: id.clone(),
                    payload: payload.clone(),
                    delivery_attempt: 1,
                });
            }
        }

        Ok(id)
    }

    pub async fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.lock().await.topics.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn subscription_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .resources
            .lock()
            .await
            .subscriptions
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sequence: u64) -> StoredMessage {
        StoredMessage {
            sequence,
            id: sequence.to_string(),
            payload: Bytes::from(sequence.to_string()),
            delivery_attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_redeliveries_keep_publish_order() {
        let state = SubscriptionState::new("subscription".to_string(), "topic".to_string());
        for sequence in 0..4 {
            state.enqueue(message(sequence));
        }

        let first = state.next().await;
        let second = state.next().await;
        let third = state.next().await;

        // Put back out of order while message 3 is still queued.
        state.redeliver(third);
        state.redeliver(first);
        state.redeliver(second);

        let mut order = Vec::new();
        while let Some(message) = state.queue.lock().pop_front() {
            order.push((message.sequence, message.delivery_attempt));
        }
        assert_eq!(order, vec![(0, 2), (1, 2), (2, 2), (3, 1)]);
    }
}
