//! Backend registry: picks the cluster backend a configuration targets.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::{ClusterClientFactory, ClusterSession, RestClusterClientFactory};
use crate::config::{Configuration, options};
use crate::error::{ExecutorError, Result};

/// Object-safe view of a [`ClusterClientFactory`].
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    fn name(&self) -> &str;

    fn is_compatible_with(&self, configuration: &Configuration) -> Result<bool>;

    /// Derive the cluster identifier, then open a session bound to it.
    ///
    /// Fails with `MissingClusterIdentifier` before anything is opened when
    /// the configuration does not address a cluster.
    async fn open_session(&self, configuration: &Configuration) -> Result<ClusterSession>;
}

struct FactoryBackend<F>(F);

#[async_trait]
impl<F> ClusterBackend for FactoryBackend<F>
where
    F: ClusterClientFactory + 'static,
{
    fn name(&self) -> &str {
        self.0.name()
    }

    fn is_compatible_with(&self, configuration: &Configuration) -> Result<bool> {
        self.0.is_compatible_with(configuration)
    }

    async fn open_session(&self, configuration: &Configuration) -> Result<ClusterSession> {
        let cluster_id = self.0.get_cluster_id(configuration)?.ok_or_else(|| {
            ExecutorError::MissingClusterIdentifier {
                backend: self.0.name().to_string(),
            }
        })?;

        let descriptor = self.0.create_cluster_descriptor(configuration).await?;
        info!(
            "Opened {} for cluster {} via backend `{}`",
            descriptor.description(),
            cluster_id,
            self.0.name()
        );

        Ok(ClusterSession::new(self.0.name(), descriptor, cluster_id))
    }
}

/// Registry of cluster backends, keyed by name.
#[derive(Clone)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn ClusterBackend>>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            backends: BTreeMap::new(),
        }
    }

    /// Register a backend from its factory.
    pub fn register_factory<F: ClusterClientFactory + 'static>(mut self, factory: F) -> Self {
        let backend = FactoryBackend(factory);
        self.backends
            .insert(backend.name().to_string(), Arc::new(backend));
        self
    }

    pub fn register(mut self, backend: Arc<dyn ClusterBackend>) -> Self {
        self.backends.insert(backend.name().to_string(), backend);
        self
    }

    /// Select the single backend compatible with `configuration`.
    pub fn get_backend(&self, configuration: &Configuration) -> Result<Arc<dyn ClusterBackend>> {
        let mut compatible = Vec::new();
        for backend in self.backends.values() {
            if backend.is_compatible_with(configuration)? {
                compatible.push(backend.clone());
            }
        }

        let target = configuration
            .get_string(options::TARGET)?
            .unwrap_or_else(|| "<unset>".to_string());

        match compatible.len() {
            1 => Ok(compatible.remove(0)),
            0 => Err(ExecutorError::precondition(format!(
                "No cluster backend accepts {}={} (available: {})",
                options::TARGET,
                target,
                self.list_names().join(", ")
            ))),
            _ => Err(ExecutorError::precondition(format!(
                "Multiple cluster backends accept {}={}: {}",
                options::TARGET,
                target,
                compatible
                    .iter()
                    .map(|b| b.name().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ClusterBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn list_names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new().register_factory(RestClusterClientFactory::new())
    }
}
