//! Read-cache (spec.md §4.D): remembers recently-read file paths so
//! the UI can later diff a `Write`/`Edit` against pre-write content.
//! Capacity 10, TTL 5 minutes, as named explicitly in spec.md §4.D.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const CAPACITY: usize = 10;
const TTL: Duration = Duration::from_secs(5 * 60);

struct Entry {
    path: String,
    inserted_at: Instant,
}

/// Bounded-by-capacity, expiring-by-TTL cache of normalized file paths.
/// Eviction is FIFO once at capacity, mirroring the teacher's small
/// fixed-size ring buffers (`state_machine::state` keeps a similar
/// bounded `VecDeque` for recent tool calls) rather than reaching for
/// a general LRU crate for ten entries.
#[derive(Default)]
pub struct ReadCache {
    entries: VecDeque<Entry>,
}

impl ReadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, file_path: &str) {
        let normalized = normalize(file_path);
        self.evict_expired();
        self.entries.retain(|e| e.path != normalized);
        if self.entries.len() >= CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(Entry {
            path: normalized,
            inserted_at: Instant::now(),
        });
    }

    pub fn contains(&mut self, file_path: &str) -> bool {
        self.evict_expired();
        let normalized = normalize(file_path);
        self.entries.iter().any(|e| e.path == normalized)
    }

    fn evict_expired(&mut self) {
        let now = Instant::now();
        self.entries.retain(|e| now.duration_since(e.inserted_at) < TTL);
    }
}

fn normalize(file_path: &str) -> String {
    file_path.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_finds_path() {
        let mut cache = ReadCache::new();
        cache.record("/a/b.rs");
        assert!(cache.contains("/a/b.rs"));
        assert!(!cache.contains("/a/c.rs"));
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut cache = ReadCache::new();
        for i in 0..CAPACITY + 1 {
            cache.record(&format!("/f{i}.rs"));
        }
        assert!(!cache.contains("/f0.rs"));
        assert!(cache.contains(&format!("/f{CAPACITY}.rs")));
    }

    #[test]
    fn windows_style_path_is_normalized() {
        let mut cache = ReadCache::new();
        cache.record("a\\b\\c.rs");
        assert!(cache.contains("a/b/c.rs"));
    }
}
