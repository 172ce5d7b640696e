#![forbid(unsafe_code)]

//! Concurrent path to view-node index.
//!
//! [`PathIndex`] is the single source of truth for "does a view node for
//! path P exist right now". Event-delivery threads insert and remove entries
//! while the render thread reads them, so every operation goes through one
//! `RwLock` over an `ahash` map: lookups share the lock, mutations take it
//! exclusively for the duration of a single map operation.
//!
//! # Contract
//!
//! - [`put`](PathIndex::put) of a path that is already present is a
//!   protocol error ([`IndexError::DuplicatePath`]). The source must remove
//!   a path before adding it again.
//! - [`remove`](PathIndex::remove) of an absent path is a protocol error
//!   ([`IndexError::UnknownPath`]): source and mirror have diverged.
//! - [`get`](PathIndex::get) never fails.

use std::fmt::Debug;
use std::sync::RwLock;

use ahash::AHashMap;
use thiserror::Error;

/// Index protocol violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("path {path} is already indexed")]
    DuplicatePath { path: String },
    #[error("path {path} is not indexed")]
    UnknownPath { path: String },
}

impl IndexError {
    /// Path the violation was reported for.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::DuplicatePath { path } | Self::UnknownPath { path } => path,
        }
    }
}

/// Map from path string to view-node handle.
///
/// `V` is a small copyable handle (the mirror stores node ids).
#[derive(Debug)]
pub struct PathIndex<V> {
    entries: RwLock<AHashMap<String, V>>,
}

impl<V: Copy + Eq + Debug> Default for PathIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Copy + Eq + Debug> PathIndex<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(AHashMap::new()),
        }
    }

    /// Register `value` for `path`.
    pub fn put(&self, path: &str, value: V) -> Result<(), IndexError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(path) {
            return Err(IndexError::DuplicatePath {
                path: path.to_owned(),
            });
        }
        entries.insert(path.to_owned(), value);
        Ok(())
    }

    /// Remove and return the entry for `path`.
    pub fn remove(&self, path: &str) -> Result<V, IndexError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(path).ok_or_else(|| IndexError::UnknownPath {
            path: path.to_owned(),
        })
    }

    /// Remove the entry for `path` only if it still maps to `value`.
    ///
    /// Returns whether an entry was removed. Used to sweep entries of a
    /// detached subtree without disturbing a path that was re-added since.
    pub fn remove_if(&self, path: &str, value: V) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.get(path) == Some(&value) {
            entries.remove(path);
            true
        } else {
            false
        }
    }

    /// Point an existing entry at `value`, returning the previous value.
    pub fn replace(&self, path: &str, value: V) -> Result<V, IndexError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(path) {
            Some(slot) => Ok(std::mem::replace(slot, value)),
            None => Err(IndexError::UnknownPath {
                path: path.to_owned(),
            }),
        }
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<V> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .copied()
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted snapshot of every indexed path (diagnostics and tests).
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        paths.sort_unstable();
        paths
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn put_then_get() {
        let index = PathIndex::new();
        index.put("/root", 1u64).unwrap();
        assert_eq!(index.get("/root"), Some(1));
        assert_eq!(index.get("/other"), None);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn duplicate_put_is_rejected() {
        let index = PathIndex::new();
        index.put("/root/a", 1u64).unwrap();
        let err = index.put("/root/a", 2).unwrap_err();
        assert_eq!(
            err,
            IndexError::DuplicatePath {
                path: "/root/a".into()
            }
        );
        // First registration survives.
        assert_eq!(index.get("/root/a"), Some(1));
    }

    #[test]
    fn remove_unknown_is_rejected() {
        let index: PathIndex<u64> = PathIndex::new();
        let err = index.remove("/nope").unwrap_err();
        assert_eq!(err.path(), "/nope");
    }

    #[test]
    fn remove_allows_re_add() {
        let index = PathIndex::new();
        index.put("/a", 1u64).unwrap();
        assert_eq!(index.remove("/a"), Ok(1));
        index.put("/a", 2).unwrap();
        assert_eq!(index.get("/a"), Some(2));
    }

    #[test]
    fn remove_if_only_matches_value() {
        let index = PathIndex::new();
        index.put("/a", 7u64).unwrap();
        assert!(!index.remove_if("/a", 8));
        assert!(index.contains("/a"));
        assert!(index.remove_if("/a", 7));
        assert!(index.is_empty());
        assert!(!index.remove_if("/a", 7));
    }

    #[test]
    fn replace_requires_existing_entry() {
        let index = PathIndex::new();
        assert!(index.replace("/a", 1u64).is_err());
        index.put("/a", 1).unwrap();
        assert_eq!(index.replace("/a", 2), Ok(1));
        assert_eq!(index.get("/a"), Some(2));
    }

    #[test]
    fn paths_are_sorted() {
        let index = PathIndex::new();
        for (i, p) in ["/r/b", "/r", "/r/a"].iter().enumerate() {
            index.put(p, i).unwrap();
        }
        assert_eq!(index.paths(), vec!["/r", "/r/a", "/r/b"]);
        index.clear();
        assert!(index.is_empty());
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let index = Arc::new(PathIndex::new());
        let writers: Vec<_> = (0..4u64)
            .map(|t| {
                let index = Arc::clone(&index);
                thread::spawn(move || {
                    for i in 0..250u64 {
                        let path = format!("/t{t}/n{i}");
                        index.put(&path, t * 1000 + i).unwrap();
                        if i % 2 == 0 {
                            index.remove(&path).unwrap();
                        }
                    }
                })
            })
            .collect();
        let reader = {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for _ in 0..1000 {
                    let _ = index.get("/t0/n1");
                }
            })
        };
        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(index.len(), 4 * 125);
    }
}
