use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub type TaskId = String;
pub type CycleId = String;
pub type Capability = String;

/// Retry ceiling used when a task is built without an explicit one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Set of capability tags.
///
/// Ordered so that log lines and serialized forms are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn insert(&mut self, capability: impl Into<Capability>) -> bool {
        self.0.insert(capability.into())
    }

    pub fn contains(&self, capability: &str) -> bool {
        self.0.contains(capability)
    }

    /// True when every tag in `self` is also in `other`.
    pub fn is_subset(&self, other: &CapabilitySet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }
}

impl<S: Into<Capability>> FromIterator<S> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.0.iter().map(String::as_str).collect();
        write!(f, "[{}]", joined.join(","))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum TaskStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
    Abandoned,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Abandoned)
    }

    /// Pending or in flight: still counts against the queue bound.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, Self::Pending | Self::InFlight)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// Named priority band. Variants are declared low to high so the derived
/// ordering matches dequeue preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!(
                "unknown priority '{}', expected one of critical, high, medium, low",
                other
            )),
        }
    }
}

/// Integer weight per priority band. Higher weight dequeues first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            critical: 100,
            high: 75,
            medium: 50,
            low: 25,
        }
    }
}

impl PriorityWeights {
    pub fn weight(&self, priority: TaskPriority) -> u32 {
        match priority {
            TaskPriority::Critical => self.critical,
            TaskPriority::High => self.high,
            TaskPriority::Medium => self.medium,
            TaskPriority::Low => self.low,
        }
    }

    /// Band a raw weight falls into. Anything at or above the critical
    /// weight is critical; anything below medium is low.
    pub fn level_of(&self, weight: u32) -> TaskPriority {
        if weight >= self.critical {
            TaskPriority::Critical
        } else if weight >= self.high {
            TaskPriority::High
        } else if weight >= self.medium {
            TaskPriority::Medium
        } else {
            TaskPriority::Low
        }
    }

    /// Weights must be strictly ordered critical > high > medium > low.
    pub fn is_ordered(&self) -> bool {
        self.critical > self.high && self.high > self.medium && self.medium > self.low
    }
}

/// Kind of work a task represents. The fixed kinds cover the built-in
/// agents; anything else is carried as `Custom` and routed purely by
/// capability tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    Web,
    Security,
    Performance,
    Testing,
    Deployment,
    Custom(String),
}

impl TaskType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Web => "web",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Testing => "testing",
            Self::Deployment => "deployment",
            Self::Custom(name) => name,
        }
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "web" => Self::Web,
            "security" => Self::Security,
            "performance" => Self::Performance,
            "testing" => Self::Testing,
            "deployment" => Self::Deployment,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<TaskType> for String {
    fn from(t: TaskType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub cycle_id: Option<CycleId>,
    pub parent_id: Option<TaskId>,
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub priority: u32,
    pub required_capabilities: CapabilitySet,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Task {
    pub fn new(task_type: impl Into<TaskType>, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            cycle_id: None,
            parent_id: None,
            task_type: task_type.into(),
            payload,
            priority: PriorityWeights::default().weight(TaskPriority::default()),
            required_capabilities: CapabilitySet::new(),
            attempt_count: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            last_attempted_at: None,
            finished_at: None,
            last_error: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the priority from a named band using the default weights.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = PriorityWeights::default().weight(priority);
        self
    }

    pub fn with_priority_weight(mut self, weight: u32) -> Self {
        self.priority = weight;
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Capability>,
    {
        self.required_capabilities = capabilities.into_iter().collect();
        self
    }

    pub fn require(mut self, capability: impl Into<Capability>) -> Self {
        self.required_capabilities.insert(capability);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn in_cycle(mut self, cycle_id: impl Into<CycleId>) -> Self {
        self.cycle_id = Some(cycle_id.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<TaskId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Another dispatch is allowed after a failure.
    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    pub fn belongs_to(&self, cycle_id: &str) -> bool {
        self.cycle_id.as_deref() == Some(cycle_id)
    }
}
