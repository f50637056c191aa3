use agentx_types::{AgentId, CapabilitySet, TaskId, TaskStatus};
use thiserror::Error;

/// 任务队列错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// 队列已满
    #[error("Task queue is full (max {max_size})")]
    QueueFull { max_size: usize },

    /// 重复任务
    #[error("Task already in queue: {0}")]
    DuplicateTask(TaskId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task {task_id} cannot go from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Invalid task {task_id}: {reason}")]
    InvalidTask { task_id: TaskId, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Agent already registered: {0}")]
    DuplicateAgent(AgentId),

    #[error("Invalid agent descriptor {agent_id}: {reason}")]
    InvalidDescriptor { agent_id: AgentId, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No registered agent has every required capability.
    #[error("No agent can serve task {task_id} (requires {required})")]
    CapabilityMismatch {
        task_id: TaskId,
        required: CapabilitySet,
    },

    #[error(transparent)]
    Queue(#[from] QueueError),
}
