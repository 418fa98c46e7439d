//! Filesystem watching through `notify`.
//!
//! Translates `notify` events into [`FileEvent`]s and delivers them to the
//! source table. Paths are reported as the watcher sees them, so sources
//! should be created with absolute paths under the watched root.

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use reparse_core::{ReparseError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::listeners::FileEvent;
use crate::source::SourceTable;

/// Maps one `notify` event to zero or more [`FileEvent`]s.
///
/// Access and metadata-only events are dropped. A rename reported as a
/// single event with both paths becomes [`FileEvent::renamed`]; halves of a
/// split rename become a delete and a create.
pub fn translate_event(event: &Event) -> Vec<FileEvent> {
    let each = |make: fn(PathBuf) -> FileEvent| -> Vec<FileEvent> {
        event.paths.iter().cloned().map(make).collect()
    };
    match event.kind {
        EventKind::Create(_) => each(FileEvent::created),
        EventKind::Remove(_) => each(FileEvent::deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![FileEvent::renamed(from.clone(), to.clone())],
            _ => Vec::new(),
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(FileEvent::deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(FileEvent::created),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => each(FileEvent::changed),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Watches a directory tree and forwards changes to a [`SourceTable`].
///
/// Watching stops when the value is dropped.
pub struct FileWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Starts watching `root` recursively.
    ///
    /// # Errors
    ///
    /// `ReparseError::Io` when the platform watcher cannot be created or
    /// `root` cannot be watched.
    pub fn watch(root: &Path, sources: Arc<SourceTable>) -> Result<Self> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for file_event in translate_event(&event) {
                    tracing::trace!("File event: {:?}", file_event);
                    sources.fire_file_event(&file_event);
                }
            }
            Err(e) => tracing::warn!("File watcher error: {}", e),
        })
        .map_err(watch_error)?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(watch_error)?;
        tracing::info!("Watching {:?} for file changes", root);

        Ok(Self {
            root: root.to_path_buf(),
            _watcher: watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn watch_error(e: notify::Error) -> ReparseError {
    ReparseError::Io(std::io::Error::other(e))
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}
