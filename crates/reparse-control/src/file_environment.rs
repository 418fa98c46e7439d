//! Disk-backed environment.
//!
//! Documents opened by the editor layer live in a shared [`OpenDocuments`]
//! store. Anything else is loaded from disk on demand and never cached, so
//! a later file change is always read afresh.
//!
//! # Security
//!
//! - File size limit: 10MB
//! - Non-UTF8 files are rejected

use async_trait::async_trait;
use dashmap::DashMap;
use reparse_core::{Document, ReparseError, Result, SchedulerControl};
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::control::SourceControl;
use crate::environment::{
    EnvironmentContext, EnvironmentFactory, EnvironmentSupport, SourceEnvironment,
};
use crate::listeners::{FileEvent, FileEventKind};

/// Maximum allowed file size in bytes (10MB).
const MAX_FILE_SIZE: u64 = 10_000_000;

/// Files larger than this log a warning (1MB).
const LARGE_FILE_THRESHOLD: u64 = 1_000_000;

/// Editor buffers keyed by path, shared by every [`FileEnvironment`].
#[derive(Debug, Default)]
pub struct OpenDocuments {
    documents: DashMap<PathBuf, Arc<Document>>,
}

impl OpenDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `path` with `text`, replacing the text of an already open
    /// buffer.
    pub fn open(&self, path: &Path, text: impl Into<String>) -> Arc<Document> {
        let text = text.into();
        match self.documents.get(path) {
            Some(document) => {
                document.replace(text);
                Arc::clone(&document)
            }
            None => {
                let document = Arc::new(Document::new(text));
                self.documents
                    .insert(path.to_path_buf(), Arc::clone(&document));
                document
            }
        }
    }

    pub fn close(&self, path: &Path) -> Option<Arc<Document>> {
        self.documents.remove(path).map(|(_, document)| document)
    }

    pub fn get(&self, path: &Path) -> Option<Arc<Document>> {
        self.documents.get(path).map(|d| Arc::clone(&d))
    }

    pub fn is_open(&self, path: &Path) -> bool {
        self.documents.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn rename(&self, from: &Path, to: &Path) {
        if let Some((_, document)) = self.documents.remove(from) {
            self.documents.insert(to.to_path_buf(), document);
        }
    }
}

/// Loads document content from disk.
///
/// # Errors
///
/// - `ReparseError::FileTooLarge` - file exceeds 10MB
/// - `ReparseError::Io` - not found, permission denied or not UTF-8
pub async fn load_document_from_disk(path: &Path) -> Result<String> {
    tracing::debug!("Loading document from disk: {:?}", path);

    let metadata = tokio::fs::metadata(path)
        .await
        .inspect_err(|e| log_io_error(path, e))?;
    let size = metadata.len();
    if size > MAX_FILE_SIZE {
        tracing::error!(
            "Document exceeds maximum size: {} bytes (limit: {} bytes)",
            size,
            MAX_FILE_SIZE
        );
        return Err(ReparseError::FileTooLarge {
            size,
            limit: MAX_FILE_SIZE,
        });
    }
    if size > LARGE_FILE_THRESHOLD {
        tracing::warn!("Document is large: {} bytes for {:?}", size, path);
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .inspect_err(|e| log_io_error(path, e))?;
    tracing::trace!("Loaded {} bytes from {:?}", content.len(), path);
    Ok(content)
}

fn log_io_error(path: &Path, e: &std::io::Error) {
    match e.kind() {
        std::io::ErrorKind::NotFound => tracing::debug!("File not found: {:?}", path),
        std::io::ErrorKind::PermissionDenied => tracing::warn!("Permission denied: {:?}", path),
        std::io::ErrorKind::InvalidData => tracing::warn!("File is not valid UTF-8: {:?}", path),
        _ => tracing::error!("IO error reading {:?}: {}", path, e),
    }
}

/// Environment for sources backed by files.
///
/// Reparse is blocked while an interactive session is open; closing the
/// last session revalidates the source after the immediate delay.
pub struct FileEnvironment {
    support: EnvironmentSupport,
    documents: Arc<OpenDocuments>,
    sessions: Arc<AtomicUsize>,
}

impl FileEnvironment {
    pub fn new(context: EnvironmentContext, documents: Arc<OpenDocuments>) -> Self {
        Self {
            support: EnvironmentSupport::new(context),
            documents,
            sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn support(&self) -> &EnvironmentSupport {
        &self.support
    }

    /// Blocks reparsing until the returned guard (and every other open
    /// session) is dropped.
    pub fn begin_interactive_session(&self) -> InteractiveSession {
        let open = self.sessions.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::trace!(
            "Interactive session started for {} ({} open)",
            self.support.source_id(),
            open
        );
        InteractiveSession {
            sessions: Arc::clone(&self.sessions),
            control: Arc::clone(self.support.control()),
        }
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SourceEnvironment for FileEnvironment {
    async fn read_document(&self, path: &Path, force_open: bool) -> Result<Option<Arc<Document>>> {
        if let Some(document) = self.documents.get(path) {
            return Ok(Some(document));
        }
        if !force_open {
            return Ok(None);
        }
        let text = load_document_from_disk(path).await?;
        Ok(Some(Arc::new(Document::new(text))))
    }

    fn attach_scheduler(&self, control: SchedulerControl, attach: bool) {
        self.support.attach_scheduler(control, attach);
    }

    fn activate(&self) {
        if self.support.activate_once() {
            self.support.listen_on_file_changes();
            self.support.listen_on_parser();
        }
    }

    fn is_reparse_blocked(&self) -> bool {
        self.open_sessions() > 0
    }

    fn file_changed(&self, event: &FileEvent) {
        if let FileEventKind::Renamed { to } = &event.kind {
            self.documents.rename(&event.path, to);
        }
        self.support.handle_file_event(event);
    }

    fn parser_changed(&self, mime_type: &str) {
        self.support.handle_parser_changed(mime_type);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Guard returned by [`FileEnvironment::begin_interactive_session`].
#[must_use = "the session ends when the guard is dropped"]
pub struct InteractiveSession {
    sessions: Arc<AtomicUsize>,
    control: Arc<SourceControl>,
}

impl Drop for InteractiveSession {
    fn drop(&mut self) {
        if self.sessions.fetch_sub(1, Ordering::AcqRel) == 1 {
            tracing::trace!("Last interactive session closed for {}", self.control.source_id());
            self.control
                .revalidate(self.control.reparse_delay(true));
        }
    }
}

impl std::fmt::Debug for InteractiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveSession")
            .field("source", &self.control.source_id())
            .finish()
    }
}

/// Creates a [`FileEnvironment`] per source over one shared document store.
pub struct FileEnvironmentFactory {
    documents: Arc<OpenDocuments>,
}

impl FileEnvironmentFactory {
    pub fn new(documents: Arc<OpenDocuments>) -> Self {
        Self { documents }
    }
}

impl EnvironmentFactory for FileEnvironmentFactory {
    fn create_environment(&self, context: EnvironmentContext) -> Arc<dyn SourceEnvironment> {
        Arc::new(FileEnvironment::new(context, Arc::clone(&self.documents)))
    }
}
