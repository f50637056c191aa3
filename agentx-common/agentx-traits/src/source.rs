use async_trait::async_trait;
use agentx_types::ScanReport;

/// Feeds the orchestrator one scan/audit report per cycle.
#[async_trait]
pub trait EventSource: Send {
    /// Next report, or `None` once the source is exhausted.
    async fn next_report(&mut self) -> Option<ScanReport>;
}

#[async_trait]
impl EventSource for tokio::sync::mpsc::Receiver<ScanReport> {
    async fn next_report(&mut self) -> Option<ScanReport> {
        self.recv().await
    }
}

#[async_trait]
impl EventSource for std::vec::IntoIter<ScanReport> {
    async fn next_report(&mut self) -> Option<ScanReport> {
        self.next()
    }
}
