use async_trait::async_trait;
use agentx_types::{AgentError, Task};

/// External execution interface behind every agent.
///
/// The scheduler is polymorphic over this trait only: content, SEO,
/// error-fixing and deployment agents differ in the provider they are
/// registered with and in their descriptor, never in scheduler code.
#[async_trait]
pub trait AgentProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Runs one task to completion and returns its structured output.
    async fn execute(&self, task: &Task) -> Result<serde_json::Value, AgentError>;

    /// Asks the provider to abandon an in-flight execution.
    ///
    /// Best effort: returns whether the provider acknowledged the request.
    /// Providers without a cancellation hook keep the default.
    async fn cancel(&self, task_id: &str) -> bool {
        let _ = task_id;
        false
    }
}
