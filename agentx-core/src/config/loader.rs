//! # Configuration Loader
//!
//! Loads and merges configuration from multiple sources:
//! 1. Default values (lowest priority)
//! 2. Configuration file (middle priority)
//! 3. Environment variables (highest priority)
//!
//! Durations in the file and in the environment are whole seconds.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use agentx_types::{AgentDescriptor, CapabilitySet, PriorityWeights, TaskPriority};
use serde::Deserialize;
use tracing::debug;

use crate::config::{Config, FollowUpRule, TaskTypeConfig};
use crate::error::{AgentxError, Result};

/// Configuration loader with support for file and environment variable overrides
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_path: PathBuf,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            env_prefix: "AGENTX".to_string(),
        }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config loader with a specific config file path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
            env_prefix: "AGENTX".to_string(),
        }
    }

    /// Create a config loader with custom environment prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            config_path: Self::default_config_path(),
            env_prefix: prefix.into(),
        }
    }

    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    fn default_config_path() -> PathBuf {
        if let Ok(config_path) = env::var("AGENTX_CONFIG") {
            return PathBuf::from(config_path);
        }

        let mut possible_paths = vec![PathBuf::from("agentx.toml"), PathBuf::from("config.toml")];
        if let Some(dir) = dirs::config_dir() {
            possible_paths.push(dir.join("agentx").join("config.toml"));
        }

        possible_paths
            .iter()
            .find(|path| path.exists())
            .cloned()
            .unwrap_or_else(|| possible_paths[0].clone())
    }

    /// Load configuration with full hierarchy
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load(&self) -> Result<Config> {
        let mut config = Config::default();

        if self.config_path.exists() {
            let file_config = self.load_from_file()?;
            config = merge_file_config(config, file_config);
            debug!(path = %self.config_path.display(), "Loaded config file");
        }

        config = self.merge_env_config(config)?;

        config.validate().map_err(|e| {
            AgentxError::configuration(format!("Configuration validation failed: {}", e))
        })?;

        Ok(config)
    }

    /// Parses a TOML document on top of the defaults, without environment overrides.
    pub fn parse_str(content: &str) -> Result<Config> {
        let file: FileConfig = toml::from_str(content)
            .map_err(|e| AgentxError::configuration(format!("Failed to parse config: {}", e)))?;
        let config = merge_file_config(Config::default(), file);
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(&self) -> Result<FileConfig> {
        let content = std::fs::read_to_string(&self.config_path).map_err(|e| {
            AgentxError::configuration(format!(
                "Failed to read config file '{}': {}",
                self.config_path.display(),
                e
            ))
        })?;

        toml::from_str(&content).map_err(|e| {
            AgentxError::configuration(format!(
                "Failed to parse config file '{}': {}",
                self.config_path.display(),
                e
            ))
        })
    }

    fn merge_env_config(&self, mut config: Config) -> Result<Config> {
        let prefix = &self.env_prefix;
        let var = |name: &str| env::var(format!("{}_{}", prefix, name)).ok();

        if let Some(val) = var("QUEUE_MAX_SIZE") {
            config.queue.max_size = parse_usize(&val, "QUEUE_MAX_SIZE")?;
        }
        if let Some(val) = var("QUEUE_MAX_ATTEMPTS") {
            config.queue.max_attempts = parse_u32(&val, "QUEUE_MAX_ATTEMPTS")?;
        }
        if let Some(val) = var("QUEUE_RETRY_DELAY_SECS") {
            config.queue.retry_delay = Duration::from_secs(parse_u64(&val, "QUEUE_RETRY_DELAY_SECS")?);
        }
        if let Some(val) = var("DISPATCH_TIMEOUT_SECS") {
            config.dispatch.default_timeout =
                Duration::from_secs(parse_u64(&val, "DISPATCH_TIMEOUT_SECS")?);
        }
        if let Some(val) = var("MEMORY_MAX_ENTRIES") {
            config.memory.max_entries = parse_usize(&val, "MEMORY_MAX_ENTRIES")?;
        }
        if let Some(val) = var("MEMORY_SIMILARITY_THRESHOLD") {
            config.memory.similarity_threshold = parse_f32(&val, "MEMORY_SIMILARITY_THRESHOLD")?;
        }
        if let Some(val) = var("MEMORY_CONVERSATION_MAX_AGE_SECS") {
            config.memory.conversation_max_age =
                Duration::from_secs(parse_u64(&val, "MEMORY_CONVERSATION_MAX_AGE_SECS")?);
        }
        if let Some(val) = var("LOG_LEVEL") {
            config.logging.level = val;
        }

        Ok(config)
    }
}

/// Merge file configuration into the base configuration
fn merge_file_config(mut base: Config, file: FileConfig) -> Config {
    if let Some(logging) = file.logging {
        if let Some(level) = logging.level {
            base.logging.level = level;
        }
        if let Some(with_target) = logging.with_target {
            base.logging.with_target = with_target;
        }
    }

    if let Some(queue) = file.queue {
        if let Some(max) = queue.max_size {
            base.queue.max_size = max;
        }
        if let Some(attempts) = queue.max_attempts {
            base.queue.max_attempts = attempts;
        }
        if let Some(secs) = queue.retry_delay_secs {
            base.queue.retry_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = queue.retention_secs {
            base.queue.retention = Duration::from_secs(secs);
        }
    }

    if let Some(dispatch) = file.dispatch {
        if let Some(secs) = dispatch.default_timeout_secs {
            base.dispatch.default_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = dispatch.cancel_timeout_secs {
            base.dispatch.cancel_timeout = Duration::from_secs(secs);
        }
        for (task_type, secs) in dispatch.task_timeouts_secs {
            base.dispatch
                .task_timeouts
                .insert(task_type, Duration::from_secs(secs));
        }
    }

    if let Some(memory) = file.memory {
        if let Some(max) = memory.max_entries {
            base.memory.max_entries = max;
        }
        if let Some(threshold) = memory.similarity_threshold {
            base.memory.similarity_threshold = threshold;
        }
        if let Some(secs) = memory.conversation_max_age_secs {
            base.memory.conversation_max_age = Duration::from_secs(secs);
        }
        if let Some(limit) = memory.context_limit {
            base.memory.context_limit = limit;
        }
    }

    if let Some(priorities) = file.priorities {
        base.priorities = priorities;
    }

    if let Some(agents) = file.agents {
        base.agents = agents;
    }

    for (name, file_type) in file.task_types {
        if let Some(secs) = file_type.timeout_secs {
            base.dispatch
                .task_timeouts
                .insert(name.clone(), Duration::from_secs(secs));
        }
        let entry = base
            .task_types
            .entry(name)
            .or_insert_with(|| TaskTypeConfig::new(Vec::<String>::new(), TaskPriority::default()));
        if let Some(capabilities) = file_type.required_capabilities {
            entry.required_capabilities = capabilities;
        }
        if let Some(priority) = file_type.default_priority {
            entry.default_priority = priority;
        }
        if file_type.priority_floor.is_some() {
            entry.priority_floor = file_type.priority_floor;
        }
        if file_type.priority_ceiling.is_some() {
            entry.priority_ceiling = file_type.priority_ceiling;
        }
    }

    if let Some(follow_ups) = file.follow_ups {
        base.follow_ups = follow_ups;
    }

    base
}

fn parse_u32(s: &str, name: &str) -> Result<u32> {
    s.parse::<u32>().map_err(|e| {
        AgentxError::configuration(format!(
            "Invalid {} '{}': must be a valid number. Error: {}",
            name, s, e
        ))
    })
}

fn parse_u64(s: &str, name: &str) -> Result<u64> {
    s.parse::<u64>().map_err(|e| {
        AgentxError::configuration(format!(
            "Invalid {} '{}': must be a valid number. Error: {}",
            name, s, e
        ))
    })
}

fn parse_usize(s: &str, name: &str) -> Result<usize> {
    s.parse::<usize>().map_err(|e| {
        AgentxError::configuration(format!(
            "Invalid {} '{}': must be a valid number. Error: {}",
            name, s, e
        ))
    })
}

fn parse_f32(s: &str, name: &str) -> Result<f32> {
    s.parse::<f32>().map_err(|e| {
        AgentxError::configuration(format!(
            "Invalid {} '{}': must be a decimal number. Error: {}",
            name, s, e
        ))
    })
}

/// File layout; every field optional so partial files work.
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    logging: Option<FileLoggingConfig>,
    #[serde(default, alias = "task_queue")]
    queue: Option<FileQueueConfig>,
    #[serde(default)]
    dispatch: Option<FileDispatchConfig>,
    #[serde(default)]
    memory: Option<FileMemoryConfig>,
    #[serde(default)]
    priorities: Option<PriorityWeights>,
    #[serde(default)]
    agents: Option<Vec<AgentDescriptor>>,
    #[serde(default)]
    task_types: BTreeMap<String, FileTaskTypeConfig>,
    #[serde(default)]
    follow_ups: Option<Vec<FollowUpRule>>,
}

#[derive(Debug, Clone, Deserialize)]
struct FileLoggingConfig {
    level: Option<String>,
    with_target: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct FileQueueConfig {
    max_size: Option<usize>,
    #[serde(alias = "retry_limit")]
    max_attempts: Option<u32>,
    #[serde(alias = "retry_delay_seconds")]
    retry_delay_secs: Option<u64>,
    retention_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct FileDispatchConfig {
    #[serde(alias = "task_timeout_seconds")]
    default_timeout_secs: Option<u64>,
    cancel_timeout_secs: Option<u64>,
    #[serde(default)]
    task_timeouts_secs: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct FileMemoryConfig {
    #[serde(alias = "conversation_buffer_size")]
    max_entries: Option<usize>,
    similarity_threshold: Option<f32>,
    conversation_max_age_secs: Option<u64>,
    context_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
struct FileTaskTypeConfig {
    required_capabilities: Option<CapabilitySet>,
    default_priority: Option<TaskPriority>,
    priority_floor: Option<TaskPriority>,
    priority_ceiling: Option<TaskPriority>,
    timeout_secs: Option<u64>,
}
