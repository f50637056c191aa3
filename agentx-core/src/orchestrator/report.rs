//! Cycle states and the report handed back to the caller.

use agentx_types::{CycleId, Task, TaskId, TaskType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a cycle is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    /// Turning the scan report into tasks
    Decomposing,
    /// Handing tasks to the queue
    Dispatching,
    /// Waiting for per-task outcomes from the dispatcher
    AwaitingResults,
    /// Applying one outcome (memory, follow-ups, escalation)
    Reconciling,
    /// Nothing left outstanding and no critical failure
    Done,
    /// A critical task exhausted its retries
    EscalatedFailure,
    /// Aborted by the caller or by shutdown
    Cancelled,
}

impl CycleState {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Done | Self::EscalatedFailure | Self::Cancelled)
    }
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CycleState::Decomposing => "decomposing",
            CycleState::Dispatching => "dispatching",
            CycleState::AwaitingResults => "awaiting_results",
            CycleState::Reconciling => "reconciling",
            CycleState::Done => "done",
            CycleState::EscalatedFailure => "escalated_failure",
            CycleState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Final status of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Done,
    EscalatedFailure,
    Cancelled,
}

impl From<CycleStatus> for CycleState {
    fn from(status: CycleStatus) -> Self {
        match status {
            CycleStatus::Done => CycleState::Done,
            CycleStatus::EscalatedFailure => CycleState::EscalatedFailure,
            CycleStatus::Cancelled => CycleState::Cancelled,
        }
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        CycleState::from(*self).fmt(f)
    }
}

/// A task that did not succeed, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub priority: u32,
    pub attempts: u32,
    pub reason: String,
}

impl TaskOutcome {
    pub fn new(task: &Task, reason: impl Into<String>) -> Self {
        Self {
            task_id: task.id.clone(),
            task_type: task.task_type.clone(),
            priority: task.priority,
            attempts: task.attempt_count,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: CycleId,
    /// Id of the scan report that started the cycle
    pub report_id: String,
    pub source: String,
    pub status: CycleStatus,
    pub succeeded: Vec<TaskId>,
    pub failed: Vec<TaskOutcome>,
    pub abandoned: Vec<TaskOutcome>,
    /// The task whose exhausted failure escalated the cycle
    pub escalated_by: Option<TaskId>,
    /// Memory writes that could not be applied
    pub memory_failures: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CycleReport {
    pub(crate) fn new(cycle_id: CycleId, report_id: String, source: String) -> Self {
        let now = Utc::now();
        Self {
            cycle_id,
            report_id,
            source,
            status: CycleStatus::Done,
            succeeded: Vec::new(),
            failed: Vec::new(),
            abandoned: Vec::new(),
            escalated_by: None,
            memory_failures: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == CycleStatus::Done
    }

    pub fn is_escalated(&self) -> bool {
        self.status == CycleStatus::EscalatedFailure
    }

    /// Tasks that reached a final state in this cycle.
    pub fn task_count(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.abandoned.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(CycleState::AwaitingResults.to_string(), "awaiting_results");
        assert_eq!(CycleStatus::EscalatedFailure.to_string(), "escalated_failure");
        assert!(CycleState::Cancelled.is_final());
        assert!(!CycleState::Reconciling.is_final());
    }

    #[test]
    fn test_outcome_from_task() {
        let task = Task::new("web", serde_json::Value::Null).with_priority_weight(75);
        let outcome = TaskOutcome::new(&task, "queue full");
        assert_eq!(outcome.task_type, TaskType::Web);
        assert_eq!(outcome.priority, 75);
        assert_eq!(outcome.reason, "queue full");
    }
}
