//! # Mock Implementations
//!
//! 可验证的 Mock 实现，用于单元测试中的依赖隔离。
//!
//! | Mock | 用途 | 关键能力 |
//! |------|------|----------|
//! | `MockAgentProvider` | Agent 执行 | 脚本化结果、延迟、阻塞闸门、并发峰值、取消记录 |
//! | `MockEmbeddingProvider` | 嵌入服务 | 确定性向量、预设向量、失败注入 |
//!
//! Enabled through the `test-utils` feature.

mod agent_provider;
mod embedding_provider;

pub use agent_provider::{MockAgentProvider, MockOutcome};
pub use embedding_provider::MockEmbeddingProvider;
