//! Storage backends for the memory store.
//!
//! | Backend           | Storage                  | Use                    |
//! |-------------------|--------------------------|------------------------|
//! | `InMemoryBackend` | `VecDeque` in process    | tests, short-lived runs |
//! | `SqliteBackend`   | single SQLite file       | persistent memory       |

mod in_memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use in_memory::InMemoryBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

use agentx_traits::cosine_similarity;
use agentx_types::{MemoryEntry, ScoredEntry};

/// Scores candidates against `query` and keeps the best `limit` at or above `threshold`.
pub(crate) fn rank_by_similarity<'a>(
    candidates: impl Iterator<Item = &'a MemoryEntry>,
    query: &[f32],
    threshold: f32,
    limit: usize,
) -> Vec<ScoredEntry> {
    let mut hits: Vec<ScoredEntry> = candidates
        .filter_map(|entry| {
            let similarity = cosine_similarity(query, &entry.embedding)?;
            (similarity >= threshold).then(|| ScoredEntry {
                entry: entry.clone(),
                similarity,
            })
        })
        .collect();

    hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    hits.truncate(limit);
    hits
}
