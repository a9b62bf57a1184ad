use crate::state::{StoredMessage, SubscriptionState};

use std::fmt::{self, Debug};
use std::sync::Arc;

use bytes::Bytes;
use pubsub_demo_broker::Delivery;

/// A message handed out by an in-memory subscription.
///
/// Dropping it without calling [`Delivery::ack`] puts the message back at the
/// head of the subscription queue.
pub struct MemoryDelivery {
    message: Option<StoredMessage>,
    subscription: Arc<SubscriptionState>,
}

impl MemoryDelivery {
    pub(crate) const fn new(message: StoredMessage, subscription: Arc<SubscriptionState>) -> Self {
        Self {
            message: Some(message),
            subscription,
        }
    }

    /// How many times this message has been handed out, starting at 1.
    #[must_use]
    pub fn delivery_attempt(&self) -> u32 {
        self.message.as_ref().map_or(0, |m| m.delivery_attempt)
    }
}

impl Debug for MemoryDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDelivery")
            .field("id", &self.id())
            .field("subscription", &self.subscription.name())
            .field("delivery_attempt", &self.delivery_attempt())
            .finish()
    }
}

impl Delivery for MemoryDelivery {
    fn id(&self) -> &str {
        self.message.as_ref().map_or("", |m| m.id.as_str())
    }

    fn payload(&self) -> &Bytes {
        static EMPTY: Bytes = Bytes::new();
        self.message.as_ref().map_or(&EMPTY, |m| &m.payload)
    }

    fn ack(mut self) {
        if self.message.take().is_some() {
            self.subscription.record_ack();
        }
    }
}

impl Drop for MemoryDelivery {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            self.subscription.redeliver(message);
        }
    }
}
