//! # Mock Agent Provider
//!
//! Agent 执行接口的 Mock 实现。

use async_trait::async_trait;
use agentx_types::{AgentError, Task, TaskId};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::agent::AgentProvider;

/// 单次执行的预设结果
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Succeed(serde_json::Value),
    Fail(String),
    /// Never returns; used to exercise timeouts.
    Hang,
    /// Panics inside `execute`.
    Panic(String),
}

/// Mock Agent
///
/// Outcomes are consumed in order; once the script is empty every call
/// gets the default outcome. With a gate installed, each execution waits
/// for one permit from [`MockAgentProvider::release`] before finishing.
#[derive(Debug, Clone)]
pub struct MockAgentProvider {
    name: String,
    script: Arc<Mutex<VecDeque<MockOutcome>>>,
    default_outcome: Arc<Mutex<MockOutcome>>,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
    hang_on_cancel: bool,
    calls: Arc<Mutex<Vec<TaskId>>>,
    cancelled: Arc<Mutex<Vec<TaskId>>>,
    active: Arc<AtomicUsize>,
    peak_active: Arc<AtomicUsize>,
}

impl MockAgentProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            default_outcome: Arc::new(Mutex::new(MockOutcome::Succeed(serde_json::json!({"ok": true})))),
            delay: Duration::ZERO,
            gate: None,
            hang_on_cancel: false,
            calls: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            peak_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every call fails unless scripted otherwise.
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        let mock = Self::new(name);
        *mock.default_outcome.lock() = MockOutcome::Fail(message.into());
        mock
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Installs a closed gate: executions block until released.
    pub fn with_gate(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// `cancel` records the call and then never returns.
    pub fn with_hanging_cancel(mut self) -> Self {
        self.hang_on_cancel = true;
        self
    }

    pub fn set_default(&self, outcome: MockOutcome) {
        *self.default_outcome.lock() = outcome;
    }

    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Lets `n` gated executions finish.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn calls(&self) -> Vec<TaskId> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn cancelled(&self) -> Vec<TaskId> {
        self.cancelled.lock().clone()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// 最大并发执行数
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> MockOutcome {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.lock().clone())
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AgentProvider for MockAgentProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, task: &Task) -> Result<serde_json::Value, AgentError> {
        self.calls.lock().push(task.id.clone());
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(self.active.clone());

        let outcome = self.next_outcome();

        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(AgentError::Cancelled),
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match outcome {
            MockOutcome::Succeed(value) => Ok(value),
            MockOutcome::Fail(msg) => Err(AgentError::Execution(msg)),
            MockOutcome::Hang => {
                std::future::pending::<()>().await;
                Err(AgentError::Cancelled)
            }
            MockOutcome::Panic(msg) => panic!("{}", msg),
        }
    }

    async fn cancel(&self, task_id: &str) -> bool {
        self.cancelled.lock().push(task_id.to_string());
        if self.hang_on_cancel {
            std::future::pending::<()>().await;
        }
        true
    }
}
