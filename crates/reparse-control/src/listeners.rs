//! Shared listener tables for file and parser change events.
//!
//! Environments register their source's id here when they start listening.
//! The tables never own sources: delivery resolves ids through the source
//! table, and disposing a source removes its id from every table.

use dashmap::DashMap;
use reparse_core::SourceId;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Kind of filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Changed,
    Deleted,
    /// The file moved to a new path.
    Renamed { to: PathBuf },
}

/// A filesystem change for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

impl FileEvent {
    pub fn changed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: FileEventKind::Changed,
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: FileEventKind::Created,
        }
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: FileEventKind::Deleted,
        }
    }

    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            path: from.into(),
            kind: FileEventKind::Renamed { to: to.into() },
        }
    }
}

/// Listener tables keyed by path and by mime type.
///
/// Mutation goes through `DashMap` shard locks, so registrations from
/// different sources never block each other unless they hash to the same
/// shard.
///
/// # Examples
///
/// ```
/// use reparse_control::listeners::ListenerRegistry;
/// use reparse_core::SourceId;
/// use std::path::Path;
///
/// let registry = ListenerRegistry::new();
/// let id = SourceId::new(1);
///
/// registry.add_file_listener(Path::new("/src/Main.java"), id);
/// registry.add_parser_listener("text/x-java", id);
/// assert_eq!(registry.file_listeners(Path::new("/src/Main.java")), vec![id]);
///
/// registry.deregister(id);
/// assert!(registry.parser_listeners("text/x-java").is_empty());
/// ```
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    files: DashMap<PathBuf, HashSet<SourceId>>,
    parsers: DashMap<String, HashSet<SourceId>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file_listener(&self, path: &Path, source: SourceId) {
        self.files
            .entry(path.to_path_buf())
            .or_default()
            .insert(source);
    }

    pub fn remove_file_listener(&self, path: &Path, source: SourceId) {
        remove_entry(&self.files, path, source);
    }

    pub fn add_parser_listener(&self, mime_type: &str, source: SourceId) {
        self.parsers
            .entry(mime_type.to_string())
            .or_default()
            .insert(source);
    }

    pub fn remove_parser_listener(&self, mime_type: &str, source: SourceId) {
        remove_entry(&self.parsers, mime_type, source);
    }

    /// Moves a file registration after a rename.
    pub fn move_file_listener(&self, from: &Path, to: &Path, source: SourceId) {
        self.remove_file_listener(from, source);
        self.add_file_listener(to, source);
    }

    pub fn file_listeners(&self, path: &Path) -> Vec<SourceId> {
        collect_sorted(self.files.get(path).as_deref())
    }

    pub fn parser_listeners(&self, mime_type: &str) -> Vec<SourceId> {
        collect_sorted(self.parsers.get(mime_type).as_deref())
    }

    /// Removes a source from every table.
    pub fn deregister(&self, source: SourceId) {
        self.files.retain(|_, ids| {
            ids.remove(&source);
            !ids.is_empty()
        });
        self.parsers.retain(|_, ids| {
            ids.remove(&source);
            !ids.is_empty()
        });
    }

    /// Total number of registrations across both tables.
    pub fn listener_count(&self) -> usize {
        let files: usize = self.files.iter().map(|e| e.value().len()).sum();
        let parsers: usize = self.parsers.iter().map(|e| e.value().len()).sum();
        files + parsers
    }
}

fn remove_entry<K, Q>(table: &DashMap<K, HashSet<SourceId>>, key: &Q, source: SourceId)
where
    K: std::borrow::Borrow<Q> + Eq + std::hash::Hash,
    Q: Eq + std::hash::Hash + ?Sized,
{
    table.remove_if_mut(key, |_, ids| {
        ids.remove(&source);
        ids.is_empty()
    });
}

fn collect_sorted(ids: Option<&HashSet<SourceId>>) -> Vec<SourceId> {
    let mut ids: Vec<SourceId> = ids.map(|ids| ids.iter().copied().collect()).unwrap_or_default();
    ids.sort_unstable();
    ids
}
