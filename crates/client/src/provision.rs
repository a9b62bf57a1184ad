use crate::error::ProvisionError;

use std::fmt::{self, Display};

use pubsub_demo_broker::{BrokerError, BrokerErrorKind, Connection};
use tracing::{debug, error, trace};

/// The kinds of resource the provisioner manages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A topic.
    Topic,

    /// A subscription bound to a topic.
    Subscription,
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topic => write!(f, "topic"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

/// How a provisioned resource came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Existence {
    /// Was already there when checked.
    Exists,

    /// Created by this provisioner.
    Created,
}

/// A provisioned topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topic {
    existence: Existence,
    name: String,
}

impl Topic {
    /// The topic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the topic was found or created.
    #[must_use]
    pub const fn existence(&self) -> Existence {
        self.existence
    }
}

/// A provisioned subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    existence: Existence,
    name: String,
    topic: String,
}

impl Subscription {
    /// The subscription id.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the topic the subscription was provisioned against.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether the subscription was found or created.
    #[must_use]
    pub const fn existence(&self) -> Existence {
        self.existence
    }
}

#[derive(Clone, Copy)]
enum Resource<'a> {
    Topic(&'a str),
    Subscription { name: &'a str, topic: &'a str },
}

impl<'a> Resource<'a> {
    const fn kind(self) -> ResourceKind {
        match self {
            Self::Topic(_) => ResourceKind::Topic,
            Self::Subscription { .. } => ResourceKind::Subscription,
        }
    }

    const fn name(self) -> &'a str {
        match self {
            Self::Topic(name) | Self::Subscription { name, .. } => name,
        }
    }

    async fn exists<C: Connection>(self, connection: &C) -> Result<bool, C::Error> {
        match self {
            Self::Topic(name) => connection.topic_exists(name).await,
            Self::Subscription { name, .. } => connection.subscription_exists(name).await,
        }
    }

    async fn create<C: Connection>(self, connection: &C) -> Result<(), C::Error> {
        match self {
            Self::Topic(name) => connection.create_topic(name).await,
            Self::Subscription { name, topic } => {
                connection.create_subscription(name, topic).await
            }
        }
    }
}

/// Check, create if missing, then check exactly once more.
///
/// A failed create is only logged: another client may have created the
/// resource in between, which the second check picks up.
async fn ensure<C: Connection>(
    connection: &C,
    resource: Resource<'_>,
) -> Result<Existence, ProvisionError<C::Error>> {
    let kind = resource.kind();
    let name = resource.name();
    let check_failed = |source| ProvisionError::Check {
        kind,
        name: name.to_string(),
        source,
    };

    if resource.exists(connection).await.map_err(check_failed)? {
        debug!("Found existing {kind} {name}");
        return Ok(Existence::Exists);
    }

    let created = match resource.create(connection).await {
        Ok(()) => true,
        Err(e) if e.kind() == BrokerErrorKind::AlreadyExists => {
            debug!("{kind} {name} was created concurrently: {e}");
            false
        }
        Err(e) => {
            error!("Failed to create {kind} {name}: {e}");
            false
        }
    };

    if resource.exists(connection).await.map_err(check_failed)? {
        if created {
            debug!("Created {kind} {name}");
            Ok(Existence::Created)
        } else {
            Ok(Existence::Exists)
        }
    } else {
        error!("Could not create {kind} {name}");
        Err(ProvisionError::NotCreated {
            kind,
            name: name.to_string(),
        })
    }
}

/// Makes sure the named topic exists.
///
/// # Errors
///
/// Returns an error if an existence check fails, or if the topic still does not
/// exist after one create attempt.
pub async fn ensure_topic<C: Connection>(
    connection: &C,
    name: &str,
) -> Result<Topic, ProvisionError<C::Error>> {
    trace!("ensure_topic(connection={}, name={name})", connection.name());

    let existence = ensure(connection, Resource::Topic(name)).await?;

    Ok(Topic {
        existence,
        name: name.to_string(),
    })
}

/// Makes sure the subscription `id` exists on `topic`.
///
/// # Errors
///
/// Returns an error if an existence check fails, or if the subscription still
/// does not exist after one create attempt.
pub async fn ensure_subscription<C: Connection>(
    connection: &C,
    topic: &Topic,
    id: &str,
) -> Result<Subscription, ProvisionError<C::Error>> {
    trace!(
        "ensure_subscription(connection={}, topic={}, id={id})",
        connection.name(),
        topic.name()
    );

    let existence = ensure(
        connection,
        Resource::Subscription {
            name: id,
            topic: topic.name(),
        },
    )
    .await?;

    Ok(Subscription {
        existence,
        name: id.to_string(),
        topic: topic.name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use pubsub_demo_broker::Broker;
    use pubsub_demo_broker_mock::{Error as MockError, MockBroker};

    #[tokio::test]
    async fn test_existing_topic_is_not_created() {
        let broker = MockBroker::new().with_topic("topic");
        let connection = broker.connect("project").await.unwrap();

        let topic = ensure_topic(&connection, "topic").await.unwrap();

        assert_eq!(topic.existence(), Existence::Exists);
        assert_eq!(broker.topic_exists_calls(), 1);
        assert_eq!(broker.create_topic_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_topic_is_created() {
        let broker = MockBroker::new();
        let connection = broker.connect("project").await.unwrap();

        let topic = ensure_topic(&connection, "topic").await.unwrap();

        assert_eq!(topic.name(), "topic");
        assert_eq!(topic.existence(), Existence::Created);
        assert!(broker.has_topic("topic"));
        assert_eq!(broker.topic_exists_calls(), 2);
    }

    #[tokio::test]
    async fn test_check_failure_is_not_retried() {
        let broker = MockBroker::new();
        broker.script_topic_exists([Err(MockError::Transport("timeout".to_string()))]);
        let connection = broker.connect("project").await.unwrap();

        let result = ensure_topic(&connection, "topic").await;

        assert_matches!(
            result,
            Err(ProvisionError::Check { kind: ResourceKind::Topic, ref name, .. }) if name == "topic"
        );
        assert_eq!(broker.topic_exists_calls(), 1);
        assert_eq!(broker.create_topic_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_recheck_is_a_check_error() {
        let broker = MockBroker::new();
        broker.script_topic_exists([
            Ok(false),
            Err(MockError::Transport("timeout".to_string())),
        ]);
        let connection = broker.connect("project").await.unwrap();

        let result = ensure_topic(&connection, "topic").await;

        assert_matches!(result, Err(ProvisionError::Check { .. }));
        assert_eq!(broker.topic_exists_calls(), 2);
    }

    #[tokio::test]
    async fn test_subscription_race() {
        let broker = MockBroker::new().with_topic("topic");
        broker.script_subscription_exists([Ok(false), Ok(true)]);
        broker.script_create_subscription([Err(MockError::AlreadyExists("sub".to_string()))]);
        let connection = broker.connect("project").await.unwrap();
        let topic = ensure_topic(&connection, "topic").await.unwrap();

        let subscription = ensure_subscription(&connection, &topic, "sub").await.unwrap();

        assert_eq!(subscription.name(), "sub");
        assert_eq!(subscription.topic(), "topic");
        assert_eq!(subscription.existence(), Existence::Exists);
        assert_eq!(broker.subscription_exists_calls(), 2);
        assert_eq!(broker.create_subscription_calls(), 1);
    }

    #[tokio::test]
    async fn test_subscription_not_created() {
        let broker = MockBroker::new().with_topic("topic");
        broker.script_subscription_exists([Ok(false), Ok(false)]);
        broker.script_create_subscription([Err(MockError::MockError("quota".to_string()))]);
        let connection = broker.connect("project").await.unwrap();
        let topic = ensure_topic(&connection, "topic").await.unwrap();

        let result = ensure_subscription(&connection, &topic, "sub").await;

        let error = result.unwrap_err();
        assert_eq!(error.to_string(), "could not create subscription sub");
        assert_matches!(
            error,
            ProvisionError::NotCreated { kind: ResourceKind::Subscription, .. }
        );
    }
}
