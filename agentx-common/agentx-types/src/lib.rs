pub mod task;
pub mod agent;
pub mod memory;
pub mod finding;
pub mod error;

pub use task::{
    Capability, CapabilitySet, CycleId, PriorityWeights, Task, TaskId, TaskPriority, TaskStatus,
    TaskType, DEFAULT_MAX_ATTEMPTS,
};
pub use agent::{AgentDescriptor, AgentId};
pub use memory::{embedding_text, InteractionType, MemoryEntry, MemoryId, ScoredEntry};
pub use finding::{Finding, ScanReport};
pub use error::{AgentError, EmbeddingError};
