//! # Dispatcher
//!
//! Matches queued tasks to agents with spare concurrency and runs them.
//!
//! One dispatch cycle walks the registry in registration order. For each
//! agent it takes a concurrency slot, asks the queue for the best task the
//! agent can serve and spawns the execution. Executions run detached under
//! a per-task-type timeout; their outcome is applied to the queue and then
//! reported on the event channel. The loop itself never awaits an agent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agentx_types::{AgentError, Task, TaskId, TaskType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::error::DispatchError;
use crate::queue::{RetryDecision, TaskQueue};
use crate::registry::{AgentRegistry, SlotGuard};

pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub default_timeout: Duration,
    /// Per task type overrides, keyed by the task type name.
    pub task_timeouts: HashMap<String, Duration>,
    /// How long a timed-out agent's cancellation hook may take.
    pub cancel_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TASK_TIMEOUT,
            task_timeouts: HashMap::new(),
            cancel_timeout: DEFAULT_CANCEL_TIMEOUT,
        }
    }
}

impl DispatchConfig {
    pub fn timeout_for(&self, task_type: &TaskType) -> Duration {
        self.task_timeouts
            .get(task_type.as_str())
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

/// Outcome of one dispatch attempt, or of a task that never got one.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    Succeeded { task: Task, output: Value },
    /// Failed but has attempts left; back to Pending.
    RetryScheduled { task: Task, error: AgentError },
    /// Failed on its last attempt.
    Failed { task: Task, error: AgentError },
    /// Never dispatched (no capable agent, or withdrawn).
    Abandoned { task: Task, reason: String },
}

impl DispatchEvent {
    pub fn task(&self) -> &Task {
        match self {
            Self::Succeeded { task, .. }
            | Self::RetryScheduled { task, .. }
            | Self::Failed { task, .. }
            | Self::Abandoned { task, .. } => task,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Self::RetryScheduled { .. })
    }
}

pub struct Dispatcher {
    queue: Arc<TaskQueue>,
    registry: Arc<AgentRegistry>,
    config: DispatchConfig,
    events: mpsc::UnboundedSender<DispatchEvent>,
    tracker: TaskTracker,
}

impl Dispatcher {
    /// Returns the dispatcher and the receiving end of its event stream.
    pub fn new(
        queue: Arc<TaskQueue>,
        registry: Arc<AgentRegistry>,
        config: DispatchConfig,
    ) -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            queue,
            registry,
            config,
            events,
            tracker: TaskTracker::new(),
        };
        (dispatcher, rx)
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Enqueues a task after checking that some agent can serve it.
    ///
    /// A task no agent can serve is abandoned on the spot, reported as an
    /// `Abandoned` event and returned as `CapabilityMismatch`; it is never
    /// retried.
    pub fn submit(&self, task: Task) -> Result<TaskId, DispatchError> {
        if !self.registry.can_serve(&task.required_capabilities) {
            let task_id = task.id.clone();
            let required = task.required_capabilities.clone();
            warn!(
                task_id = %task_id,
                task_type = %task.task_type,
                required = %required,
                "No registered agent can serve task, abandoning"
            );
            let reason = format!("no agent with capabilities {}", required);
            let task = self.queue.record_abandoned(task, reason.clone())?;
            self.emit(DispatchEvent::Abandoned { task, reason });
            return Err(DispatchError::CapabilityMismatch { task_id, required });
        }

        Ok(self.queue.enqueue(task)?)
    }

    /// One pass over all agents; returns how many tasks were started.
    pub fn run_cycle(&self) -> usize {
        let mut started = 0;
        for slot in self.registry.agents() {
            while let Some(guard) = slot.try_acquire() {
                match self.queue.dequeue_next(&slot.descriptor().capabilities) {
                    Some(task) => {
                        self.spawn_execution(task, guard);
                        started += 1;
                    }
                    // dropping the guard gives the slot back
                    None => break,
                }
            }
        }
        if started > 0 {
            debug!(started, "Dispatch cycle");
        }
        started
    }

    /// Runs dispatch cycles until `shutdown` fires, then waits for running
    /// executions to finish.
    #[instrument(skip_all)]
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(agents = self.registry.len(), "Dispatcher started");
        let ready = self.queue.ready();

        loop {
            self.run_cycle();
            self.queue.purge_finished();

            let retry_at = self.queue.next_retry_at();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = async {
                    match retry_at {
                        Some(at) => {
                            let wait = at.saturating_duration_since(Instant::now());
                            ready.wait_for_ready_timeout(wait).await;
                        }
                        None => ready.wait_for_ready().await,
                    }
                } => {}
            }
        }

        self.tracker.close();
        info!(running = self.tracker.len(), "Dispatcher stopping, waiting for executions");
        self.tracker.wait().await;
        info!("Dispatcher stopped");
    }

    fn spawn_execution(&self, task: Task, guard: SlotGuard) {
        let queue = Arc::clone(&self.queue);
        let events = self.events.clone();
        let timeout = self.config.timeout_for(&task.task_type);
        let provider = Arc::clone(guard.slot().provider());
        let agent_id = guard.slot().descriptor().agent_id.clone();

        info!(
            task_id = %task.id,
            agent_id = %agent_id,
            attempt = task.attempt_count,
            "Dispatching task"
        );

        let cancel_timeout = self.config.cancel_timeout;

        self.tracker.spawn(async move {
            // a panicking agent only takes down its own task
            let mut execution = {
                let provider = Arc::clone(&provider);
                let task = task.clone();
                tokio::spawn(async move { provider.execute(&task).await })
            };

            let outcome = match tokio::time::timeout(timeout, &mut execution).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => {
                    let reason = panic_reason(join_err);
                    error!(task_id = %task.id, agent_id = %agent_id, reason = %reason, "Agent execution panicked");
                    Err(AgentError::Execution(reason))
                }
                Err(_) => {
                    warn!(task_id = %task.id, agent_id = %agent_id, ?timeout, "Task timed out");
                    execution.abort();
                    let _ = execution.await;
                    match tokio::time::timeout(cancel_timeout, provider.cancel(&task.id)).await {
                        Ok(true) => {}
                        Ok(false) => debug!(task_id = %task.id, "Agent has no cancellation hook"),
                        Err(_) => warn!(
                            task_id = %task.id,
                            agent_id = %agent_id,
                            ?cancel_timeout,
                            "Agent cancellation hook did not return, giving up on it"
                        ),
                    }
                    Err(AgentError::Timeout(timeout))
                }
            };

            let event = match outcome {
                Ok(output) => queue
                    .complete(&task.id)
                    .map(|task| DispatchEvent::Succeeded { task, output }),
                Err(err) => queue
                    .fail(&task.id, err.to_string())
                    .map(|(task, decision)| match decision {
                        RetryDecision::Retry { .. } => DispatchEvent::RetryScheduled { task, error: err },
                        RetryDecision::Exhausted => DispatchEvent::Failed { task, error: err },
                    }),
            };

            drop(guard);
            queue.ready().notify_ready();

            match event {
                Ok(event) => {
                    let _ = events.send(event);
                }
                Err(e) => error!(task_id = %task.id, error = %e, "Failed to record task outcome"),
            }
        });
    }

    fn emit(&self, event: DispatchEvent) {
        // receiver gone means nobody is listening any more
        let _ = self.events.send(event);
    }
}

fn panic_reason(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return format!("agent execution aborted: {}", err);
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("agent panicked: {}", message)
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queue", &self.queue)
            .field("agents", &self.registry.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_lookup() {
        let mut config = DispatchConfig::default();
        config
            .task_timeouts
            .insert("deployment".into(), Duration::from_secs(900));

        assert_eq!(config.timeout_for(&TaskType::Deployment), Duration::from_secs(900));
        assert_eq!(config.timeout_for(&TaskType::Web), DEFAULT_TASK_TIMEOUT);
    }
}
