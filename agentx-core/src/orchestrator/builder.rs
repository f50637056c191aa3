//! Wires configuration and external providers into a running [`Orchestrator`].

use std::collections::HashMap;
use std::sync::Arc;

use agentx_memory::MemoryStore;
use agentx_scheduler::{AgentRegistry, Dispatcher, TaskQueue};
use agentx_traits::{AgentProvider, EmbeddingProvider, MemoryBackend};
use agentx_types::{AgentDescriptor, AgentId};
use tracing::debug;

use crate::config::Config;
use crate::error::{AgentxError, Result};
use crate::orchestrator::Orchestrator;

/// Builder for [`Orchestrator`].
///
/// Every agent in `config.agents` needs exactly one provider, registered
/// under its agent id. Without an explicit backend the memory store keeps
/// entries in process memory.
pub struct OrchestratorBuilder {
    config: Config,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    backend: Option<Box<dyn MemoryBackend>>,
    providers: HashMap<AgentId, Arc<dyn AgentProvider>>,
}

impl OrchestratorBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            embedder: None,
            backend: None,
            providers: HashMap::new(),
        }
    }

    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn backend(mut self, backend: Box<dyn MemoryBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Provider for an agent already listed in the configuration.
    pub fn provider(mut self, agent_id: impl Into<AgentId>, provider: Arc<dyn AgentProvider>) -> Self {
        self.providers.insert(agent_id.into(), provider);
        self
    }

    /// Adds an agent that is not in the configuration file.
    pub fn agent(mut self, descriptor: AgentDescriptor, provider: Arc<dyn AgentProvider>) -> Self {
        self.providers.insert(descriptor.agent_id.clone(), provider);
        self.config.agents.push(descriptor);
        self
    }

    /// Validates everything and starts the dispatcher and router tasks.
    pub fn build(mut self) -> Result<Orchestrator> {
        self.config.validate()?;

        if tokio::runtime::Handle::try_current().is_err() {
            return Err(AgentxError::configuration(
                "orchestrator must be built inside a Tokio runtime",
            ));
        }

        let embedder = self
            .embedder
            .take()
            .ok_or_else(|| AgentxError::configuration("an embedding provider is required"))?;

        let memory = match self.backend.take() {
            Some(backend) => MemoryStore::with_backend(self.config.memory.clone(), embedder, backend)?,
            None => MemoryStore::new(self.config.memory.clone(), embedder)?,
        };

        let mut registry = AgentRegistry::new();
        for descriptor in &self.config.agents {
            let provider = self.providers.remove(&descriptor.agent_id).ok_or_else(|| {
                AgentxError::configuration(format!(
                    "no provider for configured agent '{}'",
                    descriptor.agent_id
                ))
            })?;
            debug!(agent_id = %descriptor.agent_id, provider = provider.name(), "Binding agent provider");
            registry.register(descriptor.clone(), provider)?;
        }
        if let Some(agent_id) = self.providers.keys().next() {
            return Err(AgentxError::configuration(format!(
                "provider given for unknown agent '{}'",
                agent_id
            )));
        }

        let queue = Arc::new(TaskQueue::new(self.config.queue.clone()));
        let (dispatcher, events) =
            Dispatcher::new(queue, Arc::new(registry), self.config.dispatch.clone());

        Ok(Orchestrator::start(
            self.config,
            Arc::new(dispatcher),
            events,
            Arc::new(memory),
        ))
    }
}

impl std::fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("agents", &self.config.agents.len())
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("has_embedder", &self.embedder.is_some())
            .field("has_backend", &self.backend.is_some())
            .finish()
    }
}
