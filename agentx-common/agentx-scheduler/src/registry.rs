//! Agent registry.
//!
//! Descriptors are registered once at startup and never change. Each
//! agent gets a slot counter; a slot is taken with compare-and-swap so
//! `active <= max_concurrent_tasks` holds exactly under contention.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use agentx_traits::AgentProvider;
use agentx_types::{AgentDescriptor, AgentId, CapabilitySet};
use serde::Serialize;
use tracing::info;

use crate::error::RegistryError;

/// A registered agent together with its live concurrency counter.
pub struct AgentSlot {
    descriptor: AgentDescriptor,
    provider: Arc<dyn AgentProvider>,
    active: AtomicUsize,
}

impl AgentSlot {
    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    pub fn provider(&self) -> &Arc<dyn AgentProvider> {
        &self.provider
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn has_capacity(&self) -> bool {
        self.active() < self.descriptor.max_concurrent_tasks
    }

    /// Takes one slot if the agent is below its cap.
    pub fn try_acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        let max = self.descriptor.max_concurrent_tasks;
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| SlotGuard {
                slot: Arc::clone(self),
            })
    }
}

impl std::fmt::Debug for AgentSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSlot")
            .field("agent_id", &self.descriptor.agent_id)
            .field("provider", &self.provider.name())
            .field("active", &self.active())
            .finish()
    }
}

/// Holds one concurrency slot; released on drop.
#[derive(Debug)]
pub struct SlotGuard {
    slot: Arc<AgentSlot>,
}

impl SlotGuard {
    pub fn slot(&self) -> &Arc<AgentSlot> {
        &self.slot
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slot.active.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub descriptor: AgentDescriptor,
    pub active: usize,
}

#[derive(Debug, Default)]
pub struct AgentRegistry {
    slots: Vec<Arc<AgentSlot>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        descriptor: AgentDescriptor,
        provider: Arc<dyn AgentProvider>,
    ) -> Result<(), RegistryError> {
        if descriptor.agent_id.trim().is_empty() {
            return Err(RegistryError::InvalidDescriptor {
                agent_id: descriptor.agent_id,
                reason: "agent_id must not be empty".into(),
            });
        }
        if descriptor.max_concurrent_tasks == 0 {
            return Err(RegistryError::InvalidDescriptor {
                agent_id: descriptor.agent_id,
                reason: "max_concurrent_tasks must be >= 1".into(),
            });
        }
        if self.get(&descriptor.agent_id).is_some() {
            return Err(RegistryError::DuplicateAgent(descriptor.agent_id));
        }

        info!(
            agent_id = %descriptor.agent_id,
            agent_type = %descriptor.agent_type,
            capabilities = %descriptor.capabilities,
            max_concurrent = descriptor.max_concurrent_tasks,
            "Agent registered"
        );
        self.slots.push(Arc::new(AgentSlot {
            descriptor,
            provider,
            active: AtomicUsize::new(0),
        }));
        Ok(())
    }

    pub fn get(&self, agent_id: &str) -> Option<&Arc<AgentSlot>> {
        self.slots.iter().find(|s| s.descriptor.agent_id == agent_id)
    }

    /// Slots in registration order.
    pub fn agents(&self) -> &[Arc<AgentSlot>] {
        &self.slots
    }

    /// Whether any registered agent has every tag in `required`.
    pub fn can_serve(&self, required: &CapabilitySet) -> bool {
        self.slots.iter().any(|s| s.descriptor.can_serve(required))
    }

    pub fn capable_agents(&self, required: &CapabilitySet) -> Vec<AgentId> {
        self.slots
            .iter()
            .filter(|s| s.descriptor.can_serve(required))
            .map(|s| s.descriptor.agent_id.clone())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<AgentSnapshot> {
        self.slots
            .iter()
            .map(|s| AgentSnapshot {
                descriptor: s.descriptor.clone(),
                active: s.active(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
