//! # AgentX Core Library
//!
//! Multi-agent task orchestration with a shared interaction memory.
//!
//! ## Architecture
//!
//! ```text
//! scan report ─▶ Orchestrator ─▶ TaskQueue ─▶ Dispatcher ─▶ AgentProvider
//!                    ▲                             │
//!                    └──────── DispatchEvent ◀─────┘
//!                    │
//!                    └──▶ MemoryStore (results, failures, scan reports)
//! ```
//!
//! - **Types** (`agentx-types`): tasks, agents, findings, memory entries
//! - **Traits** (`agentx-traits`): agent, embedding, backend and event-source seams
//! - **Memory** (`agentx-memory`): bounded store with similarity and recency search
//! - **Scheduler** (`agentx-scheduler`): priority queue, agent registry, dispatcher
//! - **Orchestrator** (this crate): per-report cycles, follow-ups, escalation
//!
//! Configuration is one explicit [`Config`] value; see [`config`].

pub use agentx_types::*;

pub use agentx_traits::{
    cosine_similarity, AgentProvider, BackendError, EmbeddingProvider, EventSource, MemoryBackend,
};

pub use agentx_memory::{InMemoryBackend, MemoryConfig, MemoryError, MemoryStore};
#[cfg(feature = "sqlite")]
pub use agentx_memory::SqliteBackend;

pub use agentx_scheduler::{
    AgentRegistry, DispatchConfig, DispatchError, DispatchEvent, Dispatcher, QueueConfig, QueueError,
    RegistryError, RetryDecision, TaskQueue, TaskQueueStats,
};

#[cfg(feature = "test-utils")]
pub use agentx_traits::mock;

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod telemetry;

pub use config::{Config, ConfigLoader, FollowUpRule, TaskTypeConfig};
pub use error::{AgentxError, Result};
pub use orchestrator::{
    CycleHandle, CycleReport, CycleState, CycleStatus, Orchestrator, OrchestratorBuilder,
    TaskOutcome,
};
pub use telemetry::{init_tracing, LoggingConfig};
