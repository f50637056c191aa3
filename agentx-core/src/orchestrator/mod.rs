//! # Orchestrator
//!
//! Drives one cycle per scan report:
//!
//! ```text
//! Decomposing → Dispatching → AwaitingResults ⇄ Reconciling → Done
//!                                                      └──→ EscalatedFailure
//! ```
//!
//! Each cycle runs as its own Tokio task. The dispatcher reports every task
//! outcome on a single channel; a router task forwards each event to the
//! cycle that owns the task (by `cycle_id`). A cycle ends when every task it
//! submitted, including follow-ups, has reached a final outcome.
//!
//! Expected failures never surface as `Err`: they end up in the
//! [`CycleReport`]. Only a critical task that exhausted its retries
//! escalates the cycle.

pub mod builder;
pub mod decompose;
pub mod followup;
pub mod report;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use agentx_memory::{MemoryError, MemoryStore};
use agentx_scheduler::{AgentRegistry, DispatchError, DispatchEvent, Dispatcher, QueueError, TaskQueue};
use agentx_traits::EventSource;
use agentx_types::{CycleId, InteractionType, MemoryId, ScanReport, Task, TaskId, TaskStatus};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::error::{AgentxError, Result};

pub use builder::OrchestratorBuilder;
pub use decompose::TaskPlanner;
pub use report::{CycleReport, CycleState, CycleStatus, TaskOutcome};

struct CycleEntry {
    events: mpsc::UnboundedSender<DispatchEvent>,
    cancel: CancellationToken,
    state: CycleState,
}

struct Shared {
    config: Config,
    dispatcher: Arc<Dispatcher>,
    memory: Arc<MemoryStore>,
    cycles: Mutex<HashMap<CycleId, CycleEntry>>,
    /// Parent of every cycle token; cancelled once on shutdown.
    shutdown: CancellationToken,
    dispatcher_stop: CancellationToken,
    router_stop: CancellationToken,
    dispatcher_task: Mutex<Option<JoinHandle<()>>>,
    router_task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the running orchestration core. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

/// A cycle started with [`Orchestrator::start_cycle`].
#[derive(Debug)]
pub struct CycleHandle {
    cycle_id: CycleId,
    cancel: CancellationToken,
    join: JoinHandle<CycleReport>,
}

impl CycleHandle {
    pub fn cycle_id(&self) -> &CycleId {
        &self.cycle_id
    }

    /// Withdraws the cycle's Pending tasks. InFlight tasks run to completion.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<CycleReport> {
        self.join
            .await
            .map_err(|e| AgentxError::orchestrator(format!("cycle {} aborted: {}", self.cycle_id, e)))
    }
}

impl Orchestrator {
    pub fn builder(config: Config) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Spawns the dispatcher loop and the event router. Must run inside a
    /// Tokio runtime.
    pub(crate) fn start(
        config: Config,
        dispatcher: Arc<Dispatcher>,
        events: mpsc::UnboundedReceiver<DispatchEvent>,
        memory: Arc<MemoryStore>,
    ) -> Self {
        let shared = Arc::new(Shared {
            config,
            dispatcher: Arc::clone(&dispatcher),
            memory,
            cycles: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            dispatcher_stop: CancellationToken::new(),
            router_stop: CancellationToken::new(),
            dispatcher_task: Mutex::new(None),
            router_task: Mutex::new(None),
        });

        let dispatcher_task = tokio::spawn(dispatcher.run(shared.dispatcher_stop.clone()));
        let router_task = tokio::spawn(route_events(Arc::clone(&shared), events));
        *shared.dispatcher_task.lock() = Some(dispatcher_task);
        *shared.router_task.lock() = Some(router_task);

        info!(
            agents = shared.dispatcher.registry().len(),
            queue_max = shared.config.queue.max_size,
            "Orchestrator started"
        );
        Self { shared }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.shared.memory
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        self.shared.dispatcher.queue()
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        self.shared.dispatcher.registry()
    }

    /// Starts a cycle for `scan` and returns immediately.
    pub fn start_cycle(&self, scan: ScanReport) -> Result<CycleHandle> {
        if self.shared.shutdown.is_cancelled() {
            return Err(AgentxError::orchestrator("orchestrator is shut down"));
        }

        let cycle_id: CycleId = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = self.shared.shutdown.child_token();

        // registered before any task is submitted so no event can miss it
        self.shared.cycles.lock().insert(
            cycle_id.clone(),
            CycleEntry {
                events: tx,
                cancel: cancel.clone(),
                state: CycleState::Decomposing,
            },
        );

        info!(
            cycle_id = %cycle_id,
            report_id = %scan.id,
            source = %scan.source,
            findings = scan.findings.len(),
            "Cycle started"
        );

        let driver = self.clone();
        let join = tokio::spawn(driver.drive(cycle_id.clone(), scan, rx, cancel.clone()));

        Ok(CycleHandle {
            cycle_id,
            cancel,
            join,
        })
    }

    /// Runs one cycle to its final status.
    pub async fn run_cycle(&self, scan: ScanReport) -> Result<CycleReport> {
        self.start_cycle(scan)?.join().await
    }

    /// Runs one cycle per report until the source is exhausted or the
    /// orchestrator shuts down.
    pub async fn run_source<S>(&self, source: &mut S) -> Result<Vec<CycleReport>>
    where
        S: EventSource + ?Sized,
    {
        let mut reports = Vec::new();
        loop {
            let next = tokio::select! {
                _ = self.shared.shutdown.cancelled() => None,
                next = source.next_report() => next,
            };
            let Some(scan) = next else { break };

            let report = self.run_cycle(scan).await?;
            if report.is_escalated() {
                error!(
                    cycle_id = %report.cycle_id,
                    escalated_by = ?report.escalated_by,
                    "Cycle escalated"
                );
            }
            reports.push(report);
        }
        Ok(reports)
    }

    /// Cancels a running cycle. Returns false if it is unknown or finished.
    pub fn cancel_cycle(&self, cycle_id: &str) -> bool {
        match self.shared.cycles.lock().get(cycle_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_cycles(&self) -> Vec<CycleId> {
        self.shared.cycles.lock().keys().cloned().collect()
    }

    pub fn cycle_state(&self, cycle_id: &str) -> Option<CycleState> {
        self.shared.cycles.lock().get(cycle_id).map(|e| e.state)
    }

    pub fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.queue().get(task_id).map(|t| t.status)
    }

    /// Withdraws one Pending task; its cycle sees it as abandoned.
    pub async fn cancel_task(&self, task_id: &str) -> Result<Task> {
        let task = self.queue().cancel(task_id)?;
        self.shared
            .route(DispatchEvent::Abandoned {
                task: task.clone(),
                reason: "cancelled".to_string(),
            })
            .await;
        Ok(task)
    }

    pub async fn record_conversation(&self, role: &str, message: &str) -> Result<MemoryId> {
        Ok(self.shared.memory.record_conversation(role, message).await?)
    }

    /// Recent conversation history, newest first. Expired turns are purged
    /// first.
    pub async fn conversation_context(&self, limit: usize) -> Result<String> {
        self.shared.memory.purge_expired_conversations().await?;
        Ok(self.shared.memory.conversation_context(limit).await?)
    }

    /// Cancels every running cycle, stops the dispatcher once its running
    /// executions finish, then stops the router.
    pub async fn shutdown(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        info!(active_cycles = self.shared.cycles.lock().len(), "Orchestrator shutting down");
        self.shared.shutdown.cancel();
        self.shared.dispatcher_stop.cancel();

        let dispatcher_task = self.shared.dispatcher_task.lock().take();
        if let Some(handle) = dispatcher_task {
            if let Err(e) = handle.await {
                error!(error = %e, "Dispatcher task failed");
            }
        }

        self.shared.router_stop.cancel();
        let router_task = self.shared.router_task.lock().take();
        if let Some(handle) = router_task {
            if let Err(e) = handle.await {
                error!(error = %e, "Router task failed");
            }
        }
        info!("Orchestrator stopped");
    }

    #[instrument(name = "cycle", skip_all, fields(cycle_id = %cycle_id))]
    async fn drive(
        self,
        cycle_id: CycleId,
        scan: ScanReport,
        mut events: mpsc::UnboundedReceiver<DispatchEvent>,
        cancel: CancellationToken,
    ) -> CycleReport {
        let mut report = CycleReport::new(cycle_id.clone(), scan.id.clone(), scan.source.clone());
        let status = self
            .run_states(&cycle_id, &scan, &mut events, &cancel, &mut report)
            .await;

        report.status = status;
        report.finished_at = Utc::now();
        self.shared.cycles.lock().remove(&cycle_id);

        // outcomes that raced the end of the cycle
        events.close();
        while let Ok(event) = events.try_recv() {
            self.shared.absorb_unrouted(event).await;
        }

        info!(
            cycle_id = %cycle_id,
            status = %report.status,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            abandoned = report.abandoned.len(),
            memory_failures = report.memory_failures.len(),
            "Cycle finished"
        );
        report
    }

    async fn run_states(
        &self,
        cycle_id: &CycleId,
        scan: &ScanReport,
        events: &mut mpsc::UnboundedReceiver<DispatchEvent>,
        cancel: &CancellationToken,
        report: &mut CycleReport,
    ) -> CycleStatus {
        let config = &self.shared.config;
        let memory = &self.shared.memory;
        let planner = TaskPlanner::new(config);

        let mut tasks = Vec::with_capacity(scan.findings.len());
        for finding in &scan.findings {
            let mut task = planner.task_for_finding(cycle_id, scan, finding);
            if config.memory.context_limit > 0 {
                match memory
                    .search_similar(&decompose::context_query(finding), config.memory.context_limit)
                    .await
                {
                    Ok(hits) => decompose::attach_context(&mut task, &hits),
                    Err(e) => warn!(
                        cycle_id = %cycle_id,
                        task_id = %task.id,
                        error = %e,
                        "Memory context unavailable"
                    ),
                }
            }
            tasks.push(task);
        }

        // after the context lookup so the report never matches itself
        let mut metadata = HashMap::new();
        metadata.insert("cycle_id".to_string(), cycle_id.clone());
        metadata.insert("source".to_string(), scan.source.clone());
        let content = json!({
            "report_id": scan.id,
            "source": scan.source,
            "findings": scan.findings,
        });
        if let Err(e) = memory.record(InteractionType::ScanReport, content, metadata).await {
            warn!(cycle_id = %cycle_id, error = %e, "Failed to record scan report");
            report.memory_failures.push(format!("scan report {}: {}", scan.id, e));
        }

        self.set_state(cycle_id, CycleState::Dispatching);
        let mut awaiting = HashSet::new();
        for task in tasks {
            self.submit(task, &mut awaiting, report);
        }

        self.set_state(cycle_id, CycleState::AwaitingResults);
        while !awaiting.is_empty() {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                // cancelled, or the orchestrator is going away
                self.withdraw(cycle_id, "cycle cancelled", report);
                return CycleStatus::Cancelled;
            };

            if let DispatchEvent::RetryScheduled { task, error } = &event {
                debug!(
                    cycle_id = %cycle_id,
                    task_id = %task.id,
                    attempt = task.attempt_count,
                    error = %error,
                    "Task will be retried"
                );
                continue;
            }
            if !awaiting.remove(&event.task().id) {
                debug!(cycle_id = %cycle_id, task_id = %event.task().id, "Ignoring duplicate outcome");
                continue;
            }

            self.set_state(cycle_id, CycleState::Reconciling);
            if let Err(e) = self.shared.remember(&event).await {
                warn!(cycle_id = %cycle_id, task_id = %event.task().id, error = %e, "Failed to record task outcome");
                report
                    .memory_failures
                    .push(format!("task {}: {}", event.task().id, e));
            }

            match event {
                DispatchEvent::Succeeded { task, output } => {
                    report.succeeded.push(task.id.clone());
                    for follow_up in followup::follow_up_tasks(&planner, &config.follow_ups, cycle_id, &task, &output) {
                        self.submit(follow_up, &mut awaiting, report);
                    }
                }
                DispatchEvent::Failed { task, error } => {
                    report.failed.push(TaskOutcome::new(&task, error.to_string()));
                    if planner.is_critical(&task) {
                        error!(
                            cycle_id = %cycle_id,
                            task_id = %task.id,
                            task_type = %task.task_type,
                            error = %error,
                            "Critical task exhausted its retries, escalating"
                        );
                        report.escalated_by = Some(task.id.clone());
                        self.withdraw(cycle_id, "cycle escalated", report);
                        return CycleStatus::EscalatedFailure;
                    }
                    warn!(
                        cycle_id = %cycle_id,
                        task_id = %task.id,
                        error = %error,
                        "Task failed, continuing cycle"
                    );
                }
                DispatchEvent::Abandoned { task, reason } => {
                    report.abandoned.push(TaskOutcome::new(&task, reason));
                }
                DispatchEvent::RetryScheduled { .. } => {}
            }
            self.set_state(cycle_id, CycleState::AwaitingResults);
        }

        CycleStatus::Done
    }

    fn submit(&self, task: Task, awaiting: &mut HashSet<TaskId>, report: &mut CycleReport) {
        let snapshot = task.clone();
        match self.shared.dispatcher.submit(task) {
            Ok(task_id) => {
                awaiting.insert(task_id);
            }
            // the dispatcher reports the abandonment as an event
            Err(DispatchError::CapabilityMismatch { task_id, .. }) => {
                awaiting.insert(task_id);
            }
            Err(DispatchError::Queue(QueueError::QueueFull { max_size })) => {
                warn!(task_id = %snapshot.id, max_size, "Queue full, shedding task");
                let reason = "queue full";
                if let Err(e) = self.queue().record_abandoned(snapshot.clone(), reason) {
                    debug!(task_id = %snapshot.id, error = %e, "Shed task not tracked");
                }
                report.abandoned.push(TaskOutcome::new(&snapshot, reason));
            }
            Err(DispatchError::Queue(e)) => {
                warn!(task_id = %snapshot.id, error = %e, "Task rejected by queue");
                report.abandoned.push(TaskOutcome::new(&snapshot, e.to_string()));
            }
        }
    }

    fn withdraw(&self, cycle_id: &CycleId, reason: &str, report: &mut CycleReport) {
        for task in self.queue().cancel_cycle(cycle_id, reason) {
            report.abandoned.push(TaskOutcome::new(&task, reason));
        }
    }

    fn set_state(&self, cycle_id: &CycleId, state: CycleState) {
        if let Some(entry) = self.shared.cycles.lock().get_mut(cycle_id) {
            if entry.state != state {
                debug!(cycle_id = %cycle_id, from = %entry.state, to = %state, "Cycle state");
                entry.state = state;
            }
        }
    }
}

impl Shared {
    /// Forwards an event to its cycle, or absorbs it if no cycle wants it.
    async fn route(&self, event: DispatchEvent) {
        let cycle_id = event.task().cycle_id.clone();
        let unrouted = match cycle_id {
            Some(cycle_id) => {
                let cycles = self.cycles.lock();
                match cycles.get(&cycle_id) {
                    Some(entry) => entry.events.send(event).err().map(|e| e.0),
                    None => Some(event),
                }
            }
            None => Some(event),
        };
        if let Some(event) = unrouted {
            self.absorb_unrouted(event).await;
        }
    }

    async fn absorb_unrouted(&self, event: DispatchEvent) {
        if !event.is_final() {
            return;
        }
        let task = event.task();
        info!(
            task_id = %task.id,
            cycle_id = ?task.cycle_id,
            status = %task.status,
            "Outcome for task outside any active cycle"
        );
        if let Err(e) = self.remember(&event).await {
            warn!(task_id = %task.id, error = %e, "Failed to record task outcome");
        }
    }

    /// Records successes and exhausted failures in memory.
    async fn remember(&self, event: &DispatchEvent) -> std::result::Result<Option<MemoryId>, MemoryError> {
        let (interaction_type, content, task) = match event {
            DispatchEvent::Succeeded { task, output } => (
                InteractionType::TaskResult,
                json!({
                    "task_id": task.id,
                    "task_type": task.task_type,
                    "output": output,
                }),
                task,
            ),
            DispatchEvent::Failed { task, error } => (
                InteractionType::TaskFailure,
                json!({
                    "task_id": task.id,
                    "task_type": task.task_type,
                    "error": error.to_string(),
                    "attempts": task.attempt_count,
                }),
                task,
            ),
            _ => return Ok(None),
        };

        self.memory
            .record(interaction_type, content, task_metadata(task))
            .await
            .map(Some)
    }
}

fn task_metadata(task: &Task) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert("task_id".to_string(), task.id.clone());
    metadata.insert("task_type".to_string(), task.task_type.to_string());
    metadata.insert("priority".to_string(), task.priority.to_string());
    if let Some(cycle_id) = &task.cycle_id {
        metadata.insert("cycle_id".to_string(), cycle_id.clone());
    }
    if let Some(parent_id) = &task.parent_id {
        metadata.insert("parent_id".to_string(), parent_id.clone());
    }
    metadata
}

async fn route_events(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<DispatchEvent>) {
    loop {
        let event = tokio::select! {
            _ = shared.router_stop.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        shared.route(event).await;
    }
    debug!("Event router stopped");
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("dispatcher", &self.shared.dispatcher)
            .field("memory", &self.shared.memory)
            .field("active_cycles", &self.shared.cycles.lock().len())
            .finish()
    }
}

