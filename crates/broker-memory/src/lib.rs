//! In-memory implementation of the broker crate.
//!
//! Every connection opened with the same project name shares that project's
//! topics and subscriptions, so a [`MemoryBroker`] behaves like a small local
//! broker. Messages published to a topic are copied into every subscription
//! bound to it and stay queued until acknowledged.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod connection;
mod delivery;
mod error;
mod state;

pub use connection::MemoryConnection;
pub use delivery::MemoryDelivery;
pub use error::Error;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use pubsub_demo_broker::Broker;
use state::Project;
use tracing::debug;

/// Options for configuring a `MemoryBroker`.
#[derive(Clone, Copy, Debug)]
pub struct MemoryBrokerOptions {
    /// How many deliveries a single receive loop may have in flight at once.
    pub max_outstanding_messages: usize,
}

impl Default for MemoryBrokerOptions {
    fn default() -> Self {
        Self {
            max_outstanding_messages: 1,
        }
    }
}

/// An in-process broker.
#[derive(Clone, Debug, Default)]
pub struct MemoryBroker {
    options: MemoryBrokerOptions,
    projects: Arc<DashMap<String, Arc<Project>>>,
}

impl MemoryBroker {
    /// Creates a new broker with no projects.
    #[must_use]
    pub fn new(options: MemoryBrokerOptions) -> Self {
        Self {
            options,
            projects: Arc::new(DashMap::new()),
        }
    }

    fn project(&self, project: &str) -> Option<Arc<Project>> {
        self.projects.get(project).map(|entry| Arc::clone(entry.value()))
    }

    /// Names of the topics in a project, sorted.
    pub async fn topics(&self, project: &str) -> Vec<String> {
        match self.project(project) {
            Some(project) => project.topic_names().await,
            None => Vec::new(),
        }
    }

    /// Names of the subscriptions in a project, sorted.
    pub async fn subscriptions(&self, project: &str) -> Vec<String> {
        match self.project(project) {
            Some(project) => project.subscription_names().await,
            None => Vec::new(),
        }
    }

    /// Number of messages acknowledged on a subscription, if it exists.
    pub async fn acknowledged(&self, project: &str, subscription: &str) -> Option<u64> {
        let project = self.project(project)?;
        let state = project.subscription(subscription).await?;

        Some(state.acknowledged())
    }

    /// Number of messages queued on a subscription and not yet handed out.
    pub async fn pending(&self, project: &str, subscription: &str) -> Option<usize> {
        let project = self.project(project)?;
        let state = project.subscription(subscription).await?;

        Some(state.pending())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    type Error = Error;

    type Connection = MemoryConnection;

    async fn connect(&self, connection_name: &str) -> Result<Self::Connection, Self::Error> {
        validate_name(connection_name)?;

        let project = Arc::clone(
            self.projects
                .entry(connection_name.to_string())
                .or_default()
                .value(),
        );
        debug!("Opened connection to {connection_name}");

        Ok(MemoryConnection::new(
            connection_name.to_string(),
            self.options,
            project,
        ))
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.contains('/') {
        return Err(Error::InvalidName(name.to_string()));
    }

    Ok(())
}
