//! Turns findings into tasks using the configured task-type table.

use agentx_types::{CapabilitySet, CycleId, Finding, ScanReport, ScoredEntry, Task, TaskPriority, TaskType};
use serde_json::{json, Value};

use crate::config::Config;

/// Maps task-type names to capabilities and priority weights.
///
/// A category missing from the table still becomes a task; it requires a
/// capability named after the category, so it is only dispatched if some
/// agent advertises exactly that.
#[derive(Debug, Clone, Copy)]
pub struct TaskPlanner<'a> {
    config: &'a Config,
}

impl<'a> TaskPlanner<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Task of `task_type` in `cycle_id`, priority resolved from
    /// `severity` and the type's default, floor and ceiling.
    pub fn task(
        &self,
        cycle_id: &CycleId,
        task_type: &str,
        severity: Option<TaskPriority>,
        payload: Value,
    ) -> Task {
        let task_type = TaskType::from(task_type);
        let (capabilities, priority) = match self.config.task_type(task_type.as_str()) {
            Some(entry) => (
                entry.required_capabilities.clone(),
                entry.resolve_priority(severity),
            ),
            None => (
                std::iter::once(task_type.as_str()).collect::<CapabilitySet>(),
                severity.unwrap_or_default(),
            ),
        };

        Task::new(task_type, payload)
            .in_cycle(cycle_id.clone())
            .with_capabilities(capabilities.iter().cloned())
            .with_priority_weight(self.config.priorities.weight(priority))
            .with_max_attempts(self.config.queue.max_attempts)
    }

    pub fn task_for_finding(&self, cycle_id: &CycleId, report: &ScanReport, finding: &Finding) -> Task {
        let payload = json!({
            "finding": finding,
            "source": report.source,
            "report_id": report.id,
        });
        self.task(cycle_id, &finding.category, finding.severity, payload)
    }

    /// Whether a task of this weight escalates the cycle when it fails.
    pub fn is_critical(&self, task: &Task) -> bool {
        task.priority >= self.config.priorities.critical
    }
}

/// Text used to look up similar past interactions for a finding.
pub fn context_query(finding: &Finding) -> String {
    match &finding.details {
        Value::Null => format!("{} {}", finding.category, finding.title),
        Value::String(details) => format!("{} {} {}", finding.category, finding.title, details),
        details => format!("{} {} {}", finding.category, finding.title, details),
    }
}

/// Adds a `context` array of similar memory entries to the payload.
pub fn attach_context(task: &mut Task, hits: &[ScoredEntry]) {
    if hits.is_empty() {
        return;
    }
    let context: Vec<Value> = hits
        .iter()
        .map(|hit| {
            json!({
                "memory_id": hit.entry.id,
                "interaction_type": hit.entry.interaction_type,
                "similarity": hit.similarity,
            })
        })
        .collect();
    if let Value::Object(payload) = &mut task.payload {
        payload.insert("context".to_string(), Value::Array(context));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentx_types::{InteractionType, MemoryEntry};
    use std::collections::HashMap;

    fn cycle() -> CycleId {
        "cycle-1".to_string()
    }

    #[test]
    fn test_security_finding_is_at_least_high() {
        let config = Config::default();
        let planner = TaskPlanner::new(&config);
        let report = ScanReport::new(
            "scanner",
            vec![Finding::new("security", "outdated TLS").with_severity(TaskPriority::Low)],
        );

        let task = planner.task_for_finding(&cycle(), &report, &report.findings[0]);
        assert_eq!(task.task_type, TaskType::Security);
        assert_eq!(task.priority, config.priorities.high);
        assert!(task.required_capabilities.contains("security"));
        assert!(task.belongs_to("cycle-1"));
        assert_eq!(task.max_attempts, config.queue.max_attempts);
        assert_eq!(task.payload["finding"]["title"], "outdated TLS");
    }

    #[test]
    fn test_cosmetic_finding_is_capped() {
        let config = Config::default();
        let planner = TaskPlanner::new(&config);
        let task = planner.task(&cycle(), "content", Some(TaskPriority::Critical), Value::Null);
        assert_eq!(task.priority, config.priorities.medium);
        assert!(!planner.is_critical(&task));
    }

    #[test]
    fn test_unknown_category_requires_itself() {
        let config = Config::default();
        let planner = TaskPlanner::new(&config);
        let task = planner.task(&cycle(), "Accessibility", None, Value::Null);
        assert_eq!(task.task_type, TaskType::Custom("accessibility".into()));
        assert!(task.required_capabilities.contains("accessibility"));
        assert_eq!(task.priority, config.priorities.medium);
    }

    #[test]
    fn test_attach_context() {
        let config = Config::default();
        let planner = TaskPlanner::new(&config);
        let mut task = planner.task(&cycle(), "web", None, json!({"finding": {}}));
        let entry = MemoryEntry::new(
            InteractionType::TaskResult,
            json!("fixed broken link"),
            vec![1.0, 0.0],
            HashMap::new(),
        );
        attach_context(&mut task, &[ScoredEntry { entry: entry.clone(), similarity: 0.9 }]);

        assert_eq!(task.payload["context"][0]["memory_id"], entry.id.as_str());
        assert_eq!(task.payload["context"][0]["interaction_type"], "task_result");
    }

    #[test]
    fn test_context_query() {
        let finding = Finding::new("web", "404 on /about").with_details(json!("linked from home"));
        assert_eq!(context_query(&finding), "web 404 on /about linked from home");
    }
}
