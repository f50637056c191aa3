//! Bounded interaction memory with similarity and recency search.

pub mod backend;
pub mod config;
pub mod error;
pub mod store;

pub use backend::InMemoryBackend;
#[cfg(feature = "sqlite")]
pub use backend::SqliteBackend;
pub use config::MemoryConfig;
pub use error::MemoryError;
pub use store::MemoryStore;
