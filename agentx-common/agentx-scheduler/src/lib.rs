//! Priority task queue, agent registry and dispatcher.
//!
//! The [`TaskQueue`] is the only shared mutable scheduling structure; the
//! [`Dispatcher`] matches queued tasks to agents in the [`AgentRegistry`]
//! and reports outcomes as [`DispatchEvent`]s.

pub mod dispatcher;
pub mod error;
pub mod notify;
pub mod queue;
pub mod registry;

pub use dispatcher::{DispatchConfig, DispatchEvent, Dispatcher};
pub use error::{DispatchError, QueueError, RegistryError};
pub use notify::ReadyNotify;
pub use queue::{QueueConfig, RetryDecision, TaskQueue, TaskQueueStats};
pub use registry::{AgentRegistry, AgentSlot, AgentSnapshot, SlotGuard};
