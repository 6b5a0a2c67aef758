//! Runtime builder.
//!
//! Provides a fluent API for registering operators and building an
//! in-process runtime.

use std::sync::Arc;

use tracing::info;

use crate::bus::{channel_pair, PartitionedPublisher, Publisher};
use crate::client::Client;
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::interfaces::operator::Operator;
use crate::registry::OperatorRegistry;
use crate::storage::init_storage;

use super::{Runtime, RuntimeError};

/// Builder for creating a runtime.
///
/// # Example
///
/// ```ignore
/// use operant::runtime::RuntimeBuilder;
///
/// let runtime = RuntimeBuilder::new()
///     .register("Account", |id| Box::new(Account::new(id)))
///     .partitions(4)
///     .build()
///     .await?;
/// ```
#[derive(Default)]
pub struct RuntimeBuilder {
    registry: OperatorRegistry,
    config: Config,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operator type and its factory.
    pub fn register<F>(mut self, type_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&str) -> Box<dyn Operator> + Send + Sync + 'static,
    {
        self.registry.register(type_name, factory);
        self
    }

    /// Use an existing registry, replacing anything registered so far.
    pub fn with_registry(mut self, registry: OperatorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn partitions(mut self, partitions: usize) -> Self {
        self.config.transport.partitions = partitions;
        self
    }

    pub fn max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.config.coordinator.max_retries = max_retries;
        self
    }

    /// Build the runtime and start one consumer per partition.
    pub async fn build(self) -> Result<Runtime, RuntimeError> {
        if self.registry.is_empty() {
            return Err(RuntimeError::NoOperators);
        }
        let partitions = self.config.transport.partitions;
        if partitions == 0 {
            return Err(RuntimeError::InvalidConfig(
                "transport.partitions must be at least 1".to_string(),
            ));
        }

        let (publishers, consumers): (Vec<_>, Vec<_>) = (0..partitions)
            .map(|_| channel_pair(self.config.transport.channel_capacity))
            .unzip();

        let publisher: Arc<dyn Publisher> = if partitions == 1 {
            let mut publishers = publishers;
            match publishers.pop() {
                Some(publisher) => Arc::new(publisher),
                None => return Err(RuntimeError::InvalidConfig("no partition".to_string())),
            }
        } else {
            Arc::new(PartitionedPublisher::new(
                publishers
                    .into_iter()
                    .map(|p| Arc::new(p) as Arc<dyn Publisher>)
                    .collect(),
            ))
        };

        let client = Client::new(publisher, &self.registry);

        let mut stores = Vec::with_capacity(partitions);
        let mut handles = Vec::with_capacity(partitions);
        for consumer in consumers {
            let store = init_storage(&self.config.store, self.registry.clone());
            let coordinator = Coordinator::new(
                store.clone(),
                client.clone(),
                self.config.coordinator.clone(),
            );
            handles.push(consumer.start(Arc::new(coordinator)));
            stores.push(store);
        }

        info!(
            partitions,
            operators = self.registry.len(),
            "Runtime started"
        );

        Ok(Runtime {
            client,
            stores,
            consumers: handles,
        })
    }
}
