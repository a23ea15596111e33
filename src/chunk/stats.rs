//! Streaming counters and per-chunk mesh statistics.
//!
//! `StreamingStats` counts what the scheduler did over the session and keeps
//! the triangle count of every resident chunk with a running total. It is
//! what the HUD overlay (F1) and the periodic `StreamingDiag` log line show.
//!
//! # Example:
//! ```
//! use terrastream::chunk::{ChunkKey, StreamingStats};
//! let mut stats = StreamingStats::default();
//! stats.update_chunk(ChunkKey::new(0, 0), 100);
//! stats.update_chunk(ChunkKey::new(0, 0), 40);
//! assert_eq!(stats.total_triangles, 40);
//! ```

use super::ChunkKey;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct StreamingStats {
    pub fetches_started: u64,
    pub built: u64,
    pub not_ready: u64,
    pub transient_failures: u64,
    pub cancellations: u64,
    pub blacklisted: u64,
    pub evictions: u64,
    pub per_chunk_triangles: HashMap<ChunkKey, usize>,
    pub total_triangles: usize,
}

impl StreamingStats {
    /// Record the triangle count of a chunk's latest build and adjust the total.
    ///
    /// # Arguments
    /// * `key` - chunk whose resident mesh changed
    /// * `tri_count` - triangles in the new mesh
    pub fn update_chunk(&mut self, key: ChunkKey, tri_count: usize) {
        let prev = self.per_chunk_triangles.insert(key, tri_count).unwrap_or(0);
        self.total_triangles = self.total_triangles + tri_count - prev;
    }

    /// Forget a chunk's triangles (on eviction) and adjust the total.
    pub fn remove_chunk(&mut self, key: ChunkKey) {
        if let Some(prev) = self.per_chunk_triangles.remove(&key) {
            self.total_triangles = self.total_triangles.saturating_sub(prev);
        }
    }

    /// The `n` heaviest chunks by triangle count, heaviest first.
    #[must_use]
    pub fn top_chunks(&self, n: usize) -> Vec<(ChunkKey, usize)> {
        let mut entries: Vec<(ChunkKey, usize)> = self.per_chunk_triangles.iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        entries.truncate(n);
        entries
    }

    /// Clear the per-chunk table; the session counters are kept.
    pub fn clear_chunks(&mut self) {
        self.per_chunk_triangles.clear();
        self.total_triangles = 0;
    }
}
