//! Memoization of processed documents with dependency-aware invalidation.
//!
//! The cache is an explicitly passed instance, never a global, so concurrent
//! validation sessions share state only when they share a `CacheLayer`.
//! Entries are copy-on-write: `get` hands out clones, callers never mutate a
//! stored entry in place.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Diagnostic;
use crate::source_map::LineOrigin;

/// Content identity of a file. Equality is by bytes, not mtime, so a re-save
/// with identical content is a guaranteed hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub len: u64,
    pub sha256: String,
}

impl Signature {
    pub fn of_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Signature {
            len: content.len() as u64,
            sha256: format!("{:x}", hasher.finalize()),
        }
    }

    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        Ok(Signature::of_content(&std::fs::read_to_string(path)?))
    }
}

/// Fully processed state of one document.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub file_path: PathBuf,
    pub signature: Signature,
    /// Rendered and import-expanded text, ready for the JSON parse stage.
    pub rendered: String,
    pub template_origins: Vec<LineOrigin>,
    pub import_origins: Vec<LineOrigin>,
    pub warnings: Vec<Diagnostic>,
    /// Files this entry's content was built from, with the signature each
    /// had at processing time.
    pub dependencies: Vec<(PathBuf, Signature)>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

#[derive(Debug)]
struct Stored {
    entry: CachedEntry,
    last_used: u64,
}

/// LRU cache keyed by file path, with cascading invalidation along
/// dependent edges.
#[derive(Debug)]
pub struct CacheLayer {
    entries: HashMap<PathBuf, Stored>,
    /// dependency path → paths of entries built from it.
    dependents: HashMap<PathBuf, HashSet<PathBuf>>,
    capacity: usize,
    tick: u64,
    stats: CacheStats,
}

pub const DEFAULT_CAPACITY: usize = 256;

impl Default for CacheLayer {
    fn default() -> Self {
        CacheLayer::new(DEFAULT_CAPACITY)
    }
}

impl CacheLayer {
    pub fn new(capacity: usize) -> Self {
        CacheLayer {
            entries: HashMap::new(),
            dependents: HashMap::new(),
            capacity: capacity.max(1),
            tick: 0,
            stats: CacheStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Look up an entry, verifying its content signature still matches.
    ///
    /// A stale signature counts as a miss and invalidates the entry along
    /// with everything that depends on it.
    pub fn get(&mut self, path: &Path, current: &Signature) -> Option<CachedEntry> {
        let fresh = match self.entries.get(path) {
            Some(stored) => stored.entry.signature == *current,
            None => {
                self.stats.misses += 1;
                return None;
            }
        };
        if !fresh {
            self.invalidate(path, "content changed");
            self.stats.misses += 1;
            return None;
        }
        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(path).map(|stored| {
            stored.last_used = tick;
            stored.entry.clone()
        });
        if entry.is_some() {
            self.stats.hits += 1;
            tracing::debug!(file = %path.display(), "cache hit");
        }
        entry
    }

    /// Dependencies of a stored entry, without touching recency or stats.
    /// Callers use this to verify dependency freshness before `get`.
    pub fn peek_dependencies(&self, path: &Path) -> Option<&[(PathBuf, Signature)]> {
        self.entries
            .get(path)
            .map(|stored| stored.entry.dependencies.as_slice())
    }

    pub fn put(&mut self, entry: CachedEntry) {
        self.tick += 1;
        let path = entry.file_path.clone();
        for (dep, _) in &entry.dependencies {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .insert(path.clone());
        }
        self.entries.insert(
            path,
            Stored {
                entry,
                last_used: self.tick,
            },
        );
        self.evict_over_capacity();
    }

    /// Drop an entry and, transitively, every entry that depends on it.
    /// Returns the number of entries removed.
    pub fn invalidate(&mut self, path: &Path, reason: &str) -> usize {
        let mut removed = 0;
        let mut queue = vec![path.to_path_buf()];
        let mut seen = HashSet::new();

        while let Some(current) = queue.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if self.remove(&current) {
                removed += 1;
                self.stats.invalidations += 1;
            }
            if let Some(deps) = self.dependents.get(&current) {
                queue.extend(deps.iter().cloned());
            }
        }

        if removed > 0 {
            tracing::debug!(file = %path.display(), removed, reason, "cache invalidated");
        }
        removed
    }

    fn remove(&mut self, path: &Path) -> bool {
        let Some(stored) = self.entries.remove(path) else {
            return false;
        };
        for (dep, _) in &stored.entry.dependencies {
            if let Some(set) = self.dependents.get_mut(dep) {
                set.remove(path);
                if set.is_empty() {
                    self.dependents.remove(dep);
                }
            }
        }
        true
    }

    fn evict_over_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, stored)| stored.last_used)
                .map(|(path, _)| path.clone());
            let Some(path) = oldest else { break };
            self.remove(&path);
            self.stats.evictions += 1;
        }
    }
}
