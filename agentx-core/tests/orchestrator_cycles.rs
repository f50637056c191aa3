//! # Orchestrator 集成测试
//!
//! 用 Mock Agent 驱动完整周期：分解、派发、跟进任务、升级与取消。

use std::sync::Arc;
use std::time::Duration;

use agentx_core::{
    AgentDescriptor, AgentError, AgentProvider, Config, CycleStatus, Finding, InteractionType,
    Orchestrator, ScanReport, Task, TaskPriority,
};
use agentx_traits::mock::{MockAgentProvider, MockEmbeddingProvider, MockOutcome};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

fn test_config() -> Config {
    let mut config = Config::default();
    config.queue.retry_delay = Duration::from_millis(10);
    config.dispatch.default_timeout = Duration::from_secs(5);
    config
}

fn agent(id: &str, capabilities: &[&str]) -> AgentDescriptor {
    AgentDescriptor::new(id, id).with_capabilities(capabilities.iter().copied())
}

async fn start(
    config: Config,
    embedder: &MockEmbeddingProvider,
    agents: Vec<(AgentDescriptor, Arc<dyn AgentProvider>)>,
) -> Orchestrator {
    let mut builder = Orchestrator::builder(config).embedder(Arc::new(embedder.clone()));
    for (descriptor, provider) in agents {
        builder = builder.agent(descriptor, provider);
    }
    builder.build().unwrap()
}

fn provider(agent: impl AgentProvider + 'static) -> Arc<dyn AgentProvider> {
    Arc::new(agent)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

/// 记录收到的任务负载
#[derive(Default)]
struct RecordingAgent {
    payloads: Mutex<Vec<Value>>,
}

#[async_trait]
impl AgentProvider for RecordingAgent {
    fn name(&self) -> &str {
        "recording"
    }

    async fn execute(&self, task: &Task) -> Result<Value, AgentError> {
        self.payloads.lock().push(task.payload.clone());
        Ok(json!({}))
    }
}

// ==================== 正常周期 ====================

#[tokio::test]
async fn test_cycle_done_records_memory() {
    let embedder = MockEmbeddingProvider::new();
    let web = MockAgentProvider::new("web");
    let security = MockAgentProvider::new("security");
    let orchestrator = start(
        test_config(),
        &embedder,
        vec![
            (agent("web-1", &["web"]), provider(web.clone())),
            (agent("sec-1", &["security"]), provider(security.clone())),
        ],
    )
    .await;

    let scan = ScanReport::new(
        "site-audit",
        vec![
            Finding::new("web", "broken link on /about"),
            Finding::new("security", "missing CSP header"),
        ],
    );
    let report = orchestrator.run_cycle(scan.clone()).await.unwrap();

    assert_eq!(report.status, CycleStatus::Done);
    assert_eq!(report.report_id, scan.id);
    assert_eq!(report.succeeded.len(), 2);
    assert!(report.failed.is_empty());
    assert!(report.abandoned.is_empty());
    assert!(report.memory_failures.is_empty());
    assert_eq!(web.call_count(), 1);
    assert_eq!(security.call_count(), 1);

    let memory = orchestrator.memory();
    assert_eq!(memory.len().await.unwrap(), 3);
    assert_eq!(
        memory.recent(10, Some(&InteractionType::TaskResult)).await.unwrap().len(),
        2
    );
    assert_eq!(
        memory.recent(10, Some(&InteractionType::ScanReport)).await.unwrap().len(),
        1
    );
    assert!(orchestrator.active_cycles().is_empty());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_empty_report_is_done() {
    let embedder = MockEmbeddingProvider::new();
    let orchestrator = start(test_config(), &embedder, vec![]).await;

    let report = orchestrator
        .run_cycle(ScanReport::new("site-audit", vec![]))
        .await
        .unwrap();
    assert!(report.is_done());
    assert_eq!(report.task_count(), 0);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_follow_up_chain() {
    let embedder = MockEmbeddingProvider::new();
    let detector = MockAgentProvider::new("detector");
    detector.push_outcome(MockOutcome::Succeed(json!({
        "errors": [{"file": "a.js"}, {"file": "b.js"}]
    })));
    let fixer = MockAgentProvider::new("fixer");
    fixer.set_default(MockOutcome::Succeed(json!({"changes": ["patch"]})));
    let deployer = MockAgentProvider::new("deployer");

    let orchestrator = start(
        test_config(),
        &embedder,
        vec![
            (agent("detector", &["error_detection"]), provider(detector.clone())),
            (agent("fixer", &["code", "fix"]), provider(fixer.clone())),
            (agent("deployer", &["deployment"]), provider(deployer.clone())),
        ],
    )
    .await;

    let report = orchestrator
        .run_cycle(ScanReport::new(
            "error-scan",
            vec![Finding::new("error_detection", "console errors on /checkout")],
        ))
        .await
        .unwrap();

    assert!(report.is_done());
    // 1 detection + 2 fixes + 2 deployments
    assert_eq!(report.succeeded.len(), 5);
    assert_eq!(detector.call_count(), 1);
    assert_eq!(fixer.call_count(), 2);
    assert_eq!(deployer.call_count(), 2);

    let fix_id = &fixer.calls()[0];
    let fix = orchestrator.queue().get(fix_id).unwrap();
    assert_eq!(fix.parent_id.as_deref(), Some(detector.calls()[0].as_str()));
    assert!(fix.belongs_to(&report.cycle_id));

    orchestrator.shutdown().await;
}

// ==================== 失败处理 ====================

#[tokio::test]
async fn test_non_critical_failure_is_absorbed() {
    let embedder = MockEmbeddingProvider::new();
    let web = MockAgentProvider::failing("web", "crawler crashed");
    let mut config = test_config();
    config.queue.max_attempts = 2;
    let orchestrator = start(
        config,
        &embedder,
        vec![(agent("web-1", &["web"]), provider(web.clone()))],
    )
    .await;

    let report = orchestrator
        .run_cycle(ScanReport::new("site-audit", vec![Finding::new("web", "slow page")]))
        .await
        .unwrap();

    assert_eq!(report.status, CycleStatus::Done);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].attempts, 2);
    assert!(report.failed[0].reason.contains("crawler crashed"));
    assert_eq!(web.call_count(), 2);
    assert_eq!(
        orchestrator
            .memory()
            .recent(10, Some(&InteractionType::TaskFailure))
            .await
            .unwrap()
            .len(),
        1
    );

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_panicking_agent_does_not_stall_cycle() {
    let embedder = MockEmbeddingProvider::new();
    let web = MockAgentProvider::new("web");
    web.set_default(MockOutcome::Panic("crawler panicked".into()));
    let mut config = test_config();
    config.queue.max_attempts = 2;
    let orchestrator = start(
        config,
        &embedder,
        vec![(agent("web-1", &["web"]), provider(web.clone()))],
    )
    .await;

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run_cycle(ScanReport::new("site-audit", vec![Finding::new("web", "slow page")])),
    )
    .await
    .expect("cycle stalled")
    .unwrap();

    assert_eq!(report.status, CycleStatus::Done);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].attempts, 2);
    assert!(report.failed[0].reason.contains("crawler panicked"));
    assert_eq!(orchestrator.queue().stats().in_flight, 0);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_critical_failure_escalates_and_withdraws_pending() {
    let embedder = MockEmbeddingProvider::new();
    let web = MockAgentProvider::new("web").with_gate();
    let security = MockAgentProvider::failing("security", "exploit check failed");
    let mut config = test_config();
    config.queue.max_attempts = 2;
    let orchestrator = start(
        config,
        &embedder,
        vec![
            (agent("web-1", &["web"]), provider(web.clone())),
            (agent("sec-1", &["security"]), provider(security.clone())),
        ],
    )
    .await;

    let report = orchestrator
        .run_cycle(ScanReport::new(
            "site-audit",
            vec![
                Finding::new("web", "broken image"),
                Finding::new("web", "broken anchor"),
                Finding::new("security", "SQL injection").with_severity(TaskPriority::Critical),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(report.status, CycleStatus::EscalatedFailure);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.escalated_by.as_ref(), Some(&report.failed[0].task_id));
    assert_eq!(report.failed[0].attempts, 2);
    assert_eq!(security.call_count(), 2);
    assert!(report.succeeded.is_empty());
    assert!(!report.abandoned.is_empty());
    assert!(report.abandoned.iter().all(|a| a.reason == "cycle escalated"));

    web.release(2);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_unserviceable_finding_is_abandoned() {
    let embedder = MockEmbeddingProvider::new();
    let web = MockAgentProvider::new("web");
    let orchestrator = start(
        test_config(),
        &embedder,
        vec![(agent("web-1", &["web"]), provider(web.clone()))],
    )
    .await;

    let report = orchestrator
        .run_cycle(ScanReport::new(
            "site-audit",
            vec![
                Finding::new("accessibility", "missing alt text"),
                Finding::new("web", "broken link"),
            ],
        ))
        .await
        .unwrap();

    assert!(report.is_done());
    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.abandoned.len(), 1);
    assert!(report.abandoned[0].reason.contains("no agent"));
    assert_eq!(web.call_count(), 1);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_queue_full_sheds_tasks() {
    let embedder = MockEmbeddingProvider::new();
    let web = MockAgentProvider::new("web").with_gate();
    let mut config = test_config();
    config.queue.max_size = 1;
    let orchestrator = start(
        config,
        &embedder,
        vec![(agent("web-1", &["web"]), provider(web.clone()))],
    )
    .await;

    let handle = orchestrator
        .start_cycle(ScanReport::new(
            "site-audit",
            vec![
                Finding::new("web", "a"),
                Finding::new("web", "b"),
                Finding::new("web", "c"),
            ],
        ))
        .unwrap();

    let queue = orchestrator.queue().clone();
    wait_until(|| queue.stats().abandoned == 2).await;
    web.release(1);

    let report = handle.join().await.unwrap();
    assert!(report.is_done());
    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.abandoned.len(), 2);
    assert!(report.abandoned.iter().all(|a| a.reason == "queue full"));

    orchestrator.shutdown().await;
}

// ==================== 取消 ====================

#[tokio::test]
async fn test_cancel_cycle_leaves_in_flight_running() {
    let embedder = MockEmbeddingProvider::new();
    let web = MockAgentProvider::new("web").with_gate();
    let orchestrator = start(
        test_config(),
        &embedder,
        vec![(agent("web-1", &["web"]), provider(web.clone()))],
    )
    .await;

    let handle = orchestrator
        .start_cycle(ScanReport::new(
            "site-audit",
            vec![
                Finding::new("web", "a"),
                Finding::new("web", "b"),
                Finding::new("web", "c"),
            ],
        ))
        .unwrap();
    let cycle_id = handle.cycle_id().clone();

    let watched = web.clone();
    wait_until(|| watched.active() == 1).await;
    assert!(orchestrator.cycle_state(&cycle_id).is_some());

    assert!(orchestrator.cancel_cycle(&cycle_id));
    let report = handle.join().await.unwrap();

    assert_eq!(report.status, CycleStatus::Cancelled);
    assert_eq!(report.abandoned.len(), 2);
    assert!(report.abandoned.iter().all(|a| a.reason == "cycle cancelled"));
    assert!(!orchestrator.cancel_cycle(&cycle_id));

    // the running call is not interrupted
    let running = web.calls()[0].clone();
    assert_eq!(
        orchestrator.task_status(&running),
        Some(agentx_core::TaskStatus::InFlight)
    );
    web.release(1);
    let queue = orchestrator.queue().clone();
    wait_until(|| queue.stats().succeeded == 1).await;
    assert_eq!(web.call_count(), 1);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_start_after_shutdown_fails() {
    let embedder = MockEmbeddingProvider::new();
    let orchestrator = start(test_config(), &embedder, vec![]).await;
    orchestrator.shutdown().await;

    assert!(orchestrator
        .start_cycle(ScanReport::new("site-audit", vec![]))
        .is_err());
}

// ==================== 记忆 ====================

#[tokio::test]
async fn test_similar_memory_is_attached_as_context() {
    let embedder = MockEmbeddingProvider::new();
    let unit = vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
    embedder.preset("user: the login page is broken again", unit.clone());
    embedder.preset("web login page broken", unit);

    let recorder = Arc::new(RecordingAgent::default());
    let orchestrator = start(
        test_config(),
        &embedder,
        vec![(agent("web-1", &["web"]), recorder.clone() as Arc<dyn AgentProvider>)],
    )
    .await;

    let conversation_id = orchestrator
        .record_conversation("user", "the login page is broken again")
        .await
        .unwrap();

    let report = orchestrator
        .run_cycle(ScanReport::new(
            "site-audit",
            vec![Finding::new("web", "login page broken")],
        ))
        .await
        .unwrap();
    assert!(report.is_done());

    let payloads = recorder.payloads.lock().clone();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["finding"]["title"], "login page broken");
    assert_eq!(payloads[0]["source"], "site-audit");
    assert_eq!(payloads[0]["context"][0]["memory_id"], conversation_id.as_str());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_embedding_outage_is_reported_not_fatal() {
    let embedder = MockEmbeddingProvider::new();
    embedder.set_unavailable(true);
    let web = MockAgentProvider::new("web");
    let orchestrator = start(
        test_config(),
        &embedder,
        vec![(agent("web-1", &["web"]), provider(web.clone()))],
    )
    .await;

    let report = orchestrator
        .run_cycle(ScanReport::new("site-audit", vec![Finding::new("web", "broken link")]))
        .await
        .unwrap();

    assert!(report.is_done());
    assert_eq!(report.succeeded.len(), 1);
    // scan report and task result
    assert_eq!(report.memory_failures.len(), 2);
    assert!(orchestrator.memory().is_empty().await.unwrap());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_conversation_context_newest_first() {
    let embedder = MockEmbeddingProvider::new();
    let orchestrator = start(test_config(), &embedder, vec![]).await;

    orchestrator.record_conversation("user", "check the sitemap").await.unwrap();
    orchestrator.record_conversation("agent", "sitemap has 3 dead links").await.unwrap();

    let context = orchestrator.conversation_context(5).await.unwrap();
    let lines: Vec<&str> = context.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("agent: sitemap has 3 dead links"));
    assert!(lines[1].ends_with("user: check the sitemap"));

    orchestrator.shutdown().await;
}

// ==================== 事件源 ====================

#[tokio::test]
async fn test_run_source_runs_one_cycle_per_report() {
    let embedder = MockEmbeddingProvider::new();
    let web = MockAgentProvider::new("web");
    let orchestrator = start(
        test_config(),
        &embedder,
        vec![(agent("web-1", &["web"]), provider(web.clone()))],
    )
    .await;

    let mut source = vec![
        ScanReport::new("nightly", vec![Finding::new("web", "a")]),
        ScanReport::new("nightly", vec![Finding::new("web", "b"), Finding::new("web", "c")]),
    ]
    .into_iter();

    let reports = orchestrator.run_source(&mut source).await.unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.is_done()));
    assert_eq!(reports[1].succeeded.len(), 2);
    assert_ne!(reports[0].cycle_id, reports[1].cycle_id);
    assert_eq!(web.call_count(), 3);

    orchestrator.shutdown().await;
}
