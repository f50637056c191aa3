//! # 任务队列
//!
//! 有界的优先级任务队列，带重试记账。
//!
//! ## 核心职责
//! - 优先级排序：权重高者先出队，同权重按 `created_at` 先进先出
//! - 能力过滤：只返回请求方能力集合覆盖的任务
//! - 重试退避：失败任务回到 Pending，退避期满前不可出队
//! - 容量上限：Pending + InFlight 总数不超过 `max_size`
//!
//! 所有变更在同一把锁内完成，两次出队不可能拿到同一个任务。

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use agentx_types::{CapabilitySet, Task, TaskId, TaskStatus, DEFAULT_MAX_ATTEMPTS};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::QueueError;
use crate::notify::ReadyNotify;

pub const DEFAULT_MAX_SIZE: usize = 100;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// 队列配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Pending + InFlight 任务上限
    pub max_size: usize,
    /// 新建任务的默认最大尝试次数
    pub max_attempts: u32,
    /// 失败后重新可调度前的等待时间
    pub retry_delay: Duration,
    /// 终态任务保留多久后可被清理
    pub retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            retention: DEFAULT_RETENTION,
        }
    }
}

/// 失败后的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 回到 Pending，`eligible_at` 之后可再次出队
    Retry { eligible_at: Instant },
    /// 尝试次数用尽，任务进入 Failed
    Exhausted,
}

/// 任务队列统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskQueueStats {
    /// Pending + InFlight
    pub total: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub abandoned: usize,
    /// 处于退避期的 Pending 任务
    pub backing_off: usize,
    /// 按优先级权重统计的 Pending 任务数
    pub pending_by_priority: BTreeMap<u32, usize>,
}

/// 排序键：优先级高者在前，同优先级按创建时间，再按入队序号
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PendingKey {
    priority: Reverse<u32>,
    created_at: DateTime<Utc>,
    seq: u64,
    task_id: TaskId,
}

#[derive(Debug, Default)]
struct QueueState {
    /// 所有被跟踪的任务，包括未清理的终态任务
    tasks: HashMap<TaskId, Task>,
    pending: BTreeSet<PendingKey>,
    keys: HashMap<TaskId, PendingKey>,
    backoff: HashMap<TaskId, Instant>,
    outstanding: usize,
    next_seq: u64,
}

impl QueueState {
    fn push_pending(&mut self, task_id: &TaskId) {
        let Some(task) = self.tasks.get(task_id) else {
            return;
        };
        let key = PendingKey {
            priority: Reverse(task.priority),
            created_at: task.created_at,
            seq: self.next_seq,
            task_id: task_id.clone(),
        };
        self.next_seq += 1;
        self.pending.insert(key.clone());
        self.keys.insert(task_id.clone(), key);
    }

    fn remove_pending(&mut self, task_id: &str) {
        if let Some(key) = self.keys.remove(task_id) {
            self.pending.remove(&key);
        }
        self.backoff.remove(task_id);
    }

    fn finish(&mut self, task_id: &str, status: TaskStatus, error: Option<String>) -> Option<Task> {
        let task = self.tasks.get_mut(task_id)?;
        task.status = status;
        task.finished_at = Some(Utc::now());
        if error.is_some() {
            task.last_error = error;
        }
        let snapshot = task.clone();
        self.outstanding = self.outstanding.saturating_sub(1);
        Some(snapshot)
    }

    fn expect_status(&self, task_id: &str, from: TaskStatus, to: TaskStatus) -> Result<(), QueueError> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))?;
        if task.status != from {
            return Err(QueueError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to,
            });
        }
        Ok(())
    }
}

/// 任务队列
pub struct TaskQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    ready: ReadyNotify,
}

impl TaskQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            ready: ReadyNotify::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// 入队或重新排队时触发的通知
    pub fn ready(&self) -> ReadyNotify {
        self.ready.clone()
    }

    /// 添加任务到队列
    ///
    /// 不阻塞。队列满时返回 `QueueFull`，调用方决定丢弃还是延后。
    pub fn enqueue(&self, task: Task) -> Result<TaskId, QueueError> {
        if task.status != TaskStatus::Pending {
            return Err(QueueError::InvalidTransition {
                task_id: task.id,
                from: task.status,
                to: TaskStatus::Pending,
            });
        }
        if task.max_attempts == 0 || task.attempt_count >= task.max_attempts {
            return Err(QueueError::InvalidTask {
                reason: format!(
                    "attempt_count {} leaves no attempts under max_attempts {}",
                    task.attempt_count, task.max_attempts
                ),
                task_id: task.id,
            });
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.tasks.contains_key(&task.id) {
            return Err(QueueError::DuplicateTask(task.id));
        }
        if state.outstanding >= self.config.max_size {
            warn!(task_id = %task.id, max_size = self.config.max_size, "Task queue full, rejecting task");
            return Err(QueueError::QueueFull {
                max_size: self.config.max_size,
            });
        }

        let task_id = task.id.clone();
        debug!(
            task_id = %task_id,
            task_type = %task.task_type,
            priority = task.priority,
            required = %task.required_capabilities,
            "Task enqueued"
        );
        state.tasks.insert(task_id.clone(), task);
        state.push_pending(&task_id);
        state.outstanding += 1;
        drop(guard);

        self.ready.notify_ready();
        Ok(task_id)
    }

    /// 取出能力集合可处理的最高优先级任务
    ///
    /// 退避期未满的任务被跳过。找不到时返回 `None`，不阻塞。
    /// 取出的任务标记为 InFlight，`attempt_count` 加一。
    pub fn dequeue_next(&self, capabilities: &CapabilitySet) -> Option<Task> {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let key = state
            .pending
            .iter()
            .find(|key| {
                let eligible = state
                    .tasks
                    .get(&key.task_id)
                    .map_or(false, |task| task.required_capabilities.is_subset(capabilities));
                eligible && state.backoff.get(&key.task_id).map_or(true, |at| *at <= now)
            })?
            .clone();

        state.remove_pending(&key.task_id);
        let task = state.tasks.get_mut(&key.task_id)?;
        task.status = TaskStatus::InFlight;
        task.attempt_count += 1;
        task.last_attempted_at = Some(Utc::now());

        debug!(
            task_id = %task.id,
            attempt = task.attempt_count,
            max_attempts = task.max_attempts,
            "Task dequeued"
        );
        Some(task.clone())
    }

    /// InFlight → Succeeded
    pub fn complete(&self, task_id: &str) -> Result<Task, QueueError> {
        let mut state = self.state.lock();
        state.expect_status(task_id, TaskStatus::InFlight, TaskStatus::Succeeded)?;
        if let Some(task) = state.tasks.get_mut(task_id) {
            task.last_error = None;
        }
        let task = state
            .finish(task_id, TaskStatus::Succeeded, None)
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))?;
        debug!(task_id = %task_id, attempts = task.attempt_count, "Task succeeded");
        Ok(task)
    }

    /// 记录一次失败并应用重试策略
    ///
    /// 尚有尝试次数时回到 Pending 并进入退避，否则进入 Failed。
    pub fn fail(
        &self,
        task_id: &str,
        error: impl Into<String>,
    ) -> Result<(Task, RetryDecision), QueueError> {
        let error = error.into();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.expect_status(task_id, TaskStatus::InFlight, TaskStatus::Failed)?;

        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))?;

        if task.can_retry() {
            task.status = TaskStatus::Pending;
            task.last_error = Some(error);
            let snapshot = task.clone();

            let eligible_at = Instant::now() + self.config.retry_delay;
            let id = snapshot.id.clone();
            state.push_pending(&id);
            state.backoff.insert(id, eligible_at);
            drop(guard);

            info!(
                task_id = %task_id,
                attempt = snapshot.attempt_count,
                max_attempts = snapshot.max_attempts,
                retry_in = ?self.config.retry_delay,
                "Task failed, scheduled for retry"
            );
            self.ready.notify_ready();
            return Ok((snapshot, RetryDecision::Retry { eligible_at }));
        }

        let task = state
            .finish(task_id, TaskStatus::Failed, Some(error))
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))?;
        warn!(
            task_id = %task_id,
            attempts = task.attempt_count,
            error = task.last_error.as_deref().unwrap_or_default(),
            "Task failed, retries exhausted"
        );
        Ok((task, RetryDecision::Exhausted))
    }

    /// Pending → Abandoned
    pub fn abandon(&self, task_id: &str, reason: impl Into<String>) -> Result<Task, QueueError> {
        let reason = reason.into();
        let mut state = self.state.lock();
        state.expect_status(task_id, TaskStatus::Pending, TaskStatus::Abandoned)?;
        state.remove_pending(task_id);
        let task = state
            .finish(task_id, TaskStatus::Abandoned, Some(reason.clone()))
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))?;
        info!(task_id = %task_id, reason = %reason, "Task abandoned");
        Ok(task)
    }

    /// 撤回单个 Pending 任务
    pub fn cancel(&self, task_id: &str) -> Result<Task, QueueError> {
        self.abandon(task_id, "cancelled")
    }

    /// 撤回某个周期的全部 Pending 任务，InFlight 任务不受影响
    pub fn cancel_cycle(&self, cycle_id: &str, reason: &str) -> Vec<Task> {
        let mut state = self.state.lock();
        let ids: Vec<TaskId> = state
            .pending
            .iter()
            .filter(|key| {
                state
                    .tasks
                    .get(&key.task_id)
                    .map_or(false, |task| task.belongs_to(cycle_id))
            })
            .map(|key| key.task_id.clone())
            .collect();

        let mut withdrawn = Vec::with_capacity(ids.len());
        for id in ids {
            state.remove_pending(&id);
            if let Some(task) = state.finish(&id, TaskStatus::Abandoned, Some(reason.to_string())) {
                withdrawn.push(task);
            }
        }
        if !withdrawn.is_empty() {
            info!(cycle_id = %cycle_id, count = withdrawn.len(), reason = %reason, "Withdrew pending tasks of cycle");
        }
        withdrawn
    }

    /// 跟踪一个从未入队就被放弃的任务，不占用队列容量
    pub fn record_abandoned(&self, mut task: Task, reason: impl Into<String>) -> Result<Task, QueueError> {
        let mut state = self.state.lock();
        if state.tasks.contains_key(&task.id) {
            return Err(QueueError::DuplicateTask(task.id));
        }
        task.status = TaskStatus::Abandoned;
        task.last_error = Some(reason.into());
        task.finished_at = Some(Utc::now());
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.state.lock().tasks.get(task_id).cloned()
    }

    /// 周期内尚未结束（Pending 或 InFlight）的任务数
    pub fn outstanding_for_cycle(&self, cycle_id: &str) -> usize {
        self.state
            .lock()
            .tasks
            .values()
            .filter(|task| task.belongs_to(cycle_id) && task.status.is_outstanding())
            .count()
    }

    /// 清理超过保留期的终态任务
    pub fn purge_finished(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut state = self.state.lock();
        let before = state.tasks.len();
        state.tasks.retain(|_, task| {
            !(task.status.is_terminal() && task.finished_at.map_or(false, |at| at <= cutoff))
        });
        let purged = before - state.tasks.len();
        if purged > 0 {
            debug!(purged, "Purged finished tasks");
        }
        purged
    }

    /// 最早的退避到期时间；已到期的不计入
    pub fn next_retry_at(&self) -> Option<Instant> {
        let now = Instant::now();
        self.state
            .lock()
            .backoff
            .values()
            .filter(|at| **at > now)
            .min()
            .copied()
    }

    pub fn stats(&self) -> TaskQueueStats {
        let now = Instant::now();
        let state = self.state.lock();
        let mut stats = TaskQueueStats {
            total: state.outstanding,
            ..Default::default()
        };

        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Pending => {
                    stats.pending += 1;
                    *stats.pending_by_priority.entry(task.priority).or_default() += 1;
                }
                TaskStatus::InFlight => stats.in_flight += 1,
                TaskStatus::Succeeded => stats.succeeded += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Abandoned => stats.abandoned += 1,
            }
        }
        stats.backing_off = state.backoff.values().filter(|at| **at > now).count();

        stats
    }

    /// Pending + InFlight 任务数
    pub fn len(&self) -> usize {
        self.state.lock().outstanding
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("config", &self.config)
            .field("len", &self.len())
            .finish()
    }
}
