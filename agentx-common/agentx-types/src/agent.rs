use serde::{Deserialize, Serialize};

use crate::task::{CapabilitySet, Task, TaskPriority};

pub type AgentId = String;

fn default_max_concurrent_tasks() -> usize {
    1
}

/// Static registry entry for one agent.
///
/// Capabilities never change after registration. The live
/// `active_task_count` is tracked by the scheduler, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    #[serde(alias = "id")]
    pub agent_id: AgentId,
    #[serde(alias = "type")]
    pub agent_type: String,
    #[serde(default)]
    pub capabilities: CapabilitySet,
    #[serde(default = "default_max_concurrent_tasks", alias = "max_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default, alias = "priority")]
    pub priority_class: TaskPriority,
}

impl AgentDescriptor {
    pub fn new(agent_id: impl Into<AgentId>, agent_type: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            capabilities: CapabilitySet::new(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            priority_class: TaskPriority::default(),
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn with_priority_class(mut self, priority: TaskPriority) -> Self {
        self.priority_class = priority;
        self
    }

    pub fn can_serve(&self, required: &CapabilitySet) -> bool {
        required.is_subset(&self.capabilities)
    }

    pub fn can_run(&self, task: &Task) -> bool {
        self.can_serve(&task.required_capabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_toml_style_json() {
        let json = serde_json::json!({
            "agent_id": "seo-1",
            "agent_type": "seo_optimization",
            "capabilities": ["seo", "web"],
            "max_tasks": 2,
            "priority": "high"
        });
        let agent: AgentDescriptor = serde_json::from_value(json).unwrap();

        assert_eq!(agent.max_concurrent_tasks, 2);
        assert_eq!(agent.priority_class, TaskPriority::High);
        assert!(agent.capabilities.contains("seo"));
    }

    #[test]
    fn test_can_run() {
        let agent = AgentDescriptor::new("fixer", "error_fixing").with_capabilities(["code", "fix"]);
        let task = Task::new("error_fix", serde_json::Value::Null).require("fix");
        let other = Task::new("deployment", serde_json::Value::Null).require("deployment");

        assert!(agent.can_run(&task));
        assert!(!agent.can_run(&other));
    }
}
