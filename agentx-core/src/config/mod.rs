//! # AgentX Configuration Center
//!
//! One explicit configuration value handed to each component's
//! constructor. No process-wide state.
//!
//! ## Configuration Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Environment Variables           │
//! │    AGENTX_QUEUE_MAX_SIZE=200            │
//! ├─────────────────────────────────────────┤
//! │         Config File (agentx.toml)       │
//! │    [queue]                              │
//! │    max_size = 100                       │
//! ├─────────────────────────────────────────┤
//! │         Default Values                  │
//! └─────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use agentx_memory::MemoryConfig;
use agentx_scheduler::{DispatchConfig, QueueConfig};
use agentx_types::{AgentDescriptor, CapabilitySet, PriorityWeights, TaskPriority};
use serde::{Deserialize, Serialize};

use crate::error::{AgentxError, Result};
use crate::telemetry::LoggingConfig;

mod loader;

pub use loader::ConfigLoader;

/// How findings of one category become tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTypeConfig {
    #[serde(default)]
    pub required_capabilities: CapabilitySet,
    #[serde(default)]
    pub default_priority: TaskPriority,
    /// Severity never lowers the priority below this band.
    #[serde(default)]
    pub priority_floor: Option<TaskPriority>,
    /// Severity never raises the priority above this band.
    #[serde(default)]
    pub priority_ceiling: Option<TaskPriority>,
}

impl TaskTypeConfig {
    pub fn new<I, S>(capabilities: I, default_priority: TaskPriority) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required_capabilities: capabilities.into_iter().collect(),
            default_priority,
            priority_floor: None,
            priority_ceiling: None,
        }
    }

    pub fn with_floor(mut self, floor: TaskPriority) -> Self {
        self.priority_floor = Some(floor);
        self
    }

    pub fn with_ceiling(mut self, ceiling: TaskPriority) -> Self {
        self.priority_ceiling = Some(ceiling);
        self
    }

    /// Severity if given, else the default, clamped to floor and ceiling.
    pub fn resolve_priority(&self, severity: Option<TaskPriority>) -> TaskPriority {
        let mut priority = severity.unwrap_or(self.default_priority);
        if let Some(floor) = self.priority_floor {
            priority = priority.max(floor);
        }
        if let Some(ceiling) = self.priority_ceiling {
            priority = priority.min(ceiling);
        }
        priority
    }
}

/// Emits one follow-up task per element of an array in a successful
/// task's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUpRule {
    pub on_task_type: String,
    pub output_field: String,
    pub emit_task_type: String,
}

impl FollowUpRule {
    pub fn new(
        on_task_type: impl Into<String>,
        output_field: impl Into<String>,
        emit_task_type: impl Into<String>,
    ) -> Self {
        Self {
            on_task_type: on_task_type.into(),
            output_field: output_field.into(),
            emit_task_type: emit_task_type.into(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub logging: LoggingConfig,
    pub queue: QueueConfig,
    pub dispatch: DispatchConfig,
    pub memory: MemoryConfig,
    pub priorities: PriorityWeights,
    pub agents: Vec<AgentDescriptor>,
    pub task_types: BTreeMap<String, TaskTypeConfig>,
    pub follow_ups: Vec<FollowUpRule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            queue: QueueConfig::default(),
            dispatch: DispatchConfig::default(),
            memory: MemoryConfig::default(),
            priorities: PriorityWeights::default(),
            agents: Vec::new(),
            task_types: default_task_types(),
            follow_ups: default_follow_ups(),
        }
    }
}

/// Built-in finding categories.
pub fn default_task_types() -> BTreeMap<String, TaskTypeConfig> {
    use TaskPriority::*;

    BTreeMap::from([
        ("web".to_string(), TaskTypeConfig::new(["web"], Medium)),
        (
            "security".to_string(),
            TaskTypeConfig::new(["security"], High).with_floor(High),
        ),
        ("performance".to_string(), TaskTypeConfig::new(["performance"], Medium)),
        ("testing".to_string(), TaskTypeConfig::new(["testing"], Medium)),
        ("deployment".to_string(), TaskTypeConfig::new(["deployment"], High)),
        (
            "content".to_string(),
            TaskTypeConfig::new(["content"], Low).with_ceiling(Medium),
        ),
        (
            "seo".to_string(),
            TaskTypeConfig::new(["seo"], Medium).with_ceiling(Medium),
        ),
        ("error_detection".to_string(), TaskTypeConfig::new(["error_detection"], High)),
        ("error_fix".to_string(), TaskTypeConfig::new(["code", "fix"], High)),
    ])
}

pub fn default_follow_ups() -> Vec<FollowUpRule> {
    vec![
        FollowUpRule::new("error_detection", "errors", "error_fix"),
        FollowUpRule::new("error_fix", "changes", "deployment"),
    ]
}

impl Config {
    /// Load configuration with full hierarchy (defaults -> file -> env)
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific path
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self> {
        ConfigLoader::with_path(path).load()
    }

    pub fn task_type(&self, name: &str) -> Option<&TaskTypeConfig> {
        self.task_types.get(name)
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentDescriptor> {
        self.agents.iter().find(|a| a.agent_id == agent_id)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_size == 0 {
            return Err(validation_error("queue.max_size must be >= 1"));
        }
        if self.queue.max_attempts == 0 {
            return Err(validation_error("queue.max_attempts must be >= 1"));
        }
        if self.dispatch.default_timeout.is_zero() {
            return Err(validation_error("dispatch.default_timeout cannot be zero"));
        }
        if let Some((task_type, _)) = self.dispatch.task_timeouts.iter().find(|(_, t)| t.is_zero()) {
            return Err(validation_error(format!(
                "timeout for task type '{}' cannot be zero",
                task_type
            )));
        }
        self.memory
            .validate()
            .map_err(|e| validation_error(e.to_string()))?;
        if !self.priorities.is_ordered() {
            return Err(validation_error(format!(
                "priorities must satisfy critical > high > medium > low (got {}/{}/{}/{})",
                self.priorities.critical,
                self.priorities.high,
                self.priorities.medium,
                self.priorities.low
            )));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.agent_id.trim().is_empty() {
                return Err(validation_error("agent id cannot be empty"));
            }
            if agent.max_concurrent_tasks == 0 {
                return Err(validation_error(format!(
                    "agent '{}' max_concurrent_tasks must be >= 1",
                    agent.agent_id
                )));
            }
            if !seen.insert(agent.agent_id.as_str()) {
                return Err(validation_error(format!(
                    "duplicate agent id '{}'",
                    agent.agent_id
                )));
            }
        }

        for (name, task_type) in &self.task_types {
            if let (Some(floor), Some(ceiling)) = (task_type.priority_floor, task_type.priority_ceiling) {
                if floor > ceiling {
                    return Err(validation_error(format!(
                        "task type '{}' has priority_floor {} above priority_ceiling {}",
                        name, floor, ceiling
                    )));
                }
            }
        }

        for rule in &self.follow_ups {
            if rule.on_task_type.is_empty() || rule.output_field.is_empty() || rule.emit_task_type.is_empty() {
                return Err(validation_error("follow-up rules need on_task_type, output_field and emit_task_type"));
            }
        }

        Ok(())
    }
}

/// Configuration error helper
fn validation_error(msg: impl Into<String>) -> AgentxError {
    AgentxError::configuration(format!("Validation error: {}", msg.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.queue.max_size, 100);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.queue.retry_delay, Duration::from_secs(60));
        assert_eq!(config.dispatch.default_timeout, Duration::from_secs(300));
        assert_eq!(config.memory.max_entries, 1000);
        assert_eq!(config.priorities.critical, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_priority_clamps() {
        let config = Config::default();
        let security = config.task_type("security").unwrap();
        assert_eq!(security.resolve_priority(Some(TaskPriority::Low)), TaskPriority::High);
        assert_eq!(security.resolve_priority(Some(TaskPriority::Critical)), TaskPriority::Critical);

        let content = config.task_type("content").unwrap();
        assert_eq!(content.resolve_priority(None), TaskPriority::Low);
        assert_eq!(content.resolve_priority(Some(TaskPriority::Critical)), TaskPriority::Medium);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.queue.max_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.priorities.high = config.priorities.critical;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.agents.push(AgentDescriptor::new("a", "web"));
        config.agents.push(AgentDescriptor::new("a", "seo"));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.task_types.insert(
            "odd".into(),
            TaskTypeConfig::new(["x"], TaskPriority::Medium)
                .with_floor(TaskPriority::Critical)
                .with_ceiling(TaskPriority::Low),
        );
        assert!(config.validate().is_err());
    }
}
