use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskPriority;

/// One typed finding from a scan or audit.
///
/// `category` selects the task type the finding turns into; `severity`,
/// when present, overrides that task type's default priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub category: String,
    #[serde(default)]
    pub severity: Option<TaskPriority>,
    pub title: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl Finding {
    pub fn new(category: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            severity: None,
            title: title.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_severity(mut self, severity: TaskPriority) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Result of one scan/audit pass, decomposed into tasks by one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub id: String,
    pub source: String,
    pub findings: Vec<Finding>,
    pub received_at: DateTime<Utc>,
}

impl ScanReport {
    pub fn new(source: impl Into<String>, findings: Vec<Finding>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            findings,
            received_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }
}
