//! Per-source environment policy and its shared plumbing.

use async_trait::async_trait;
use parking_lot::Mutex;
use reparse_core::{Document, ParsingConfig, Result, SchedulerControl, SourceId};
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::control::SourceControl;
use crate::listeners::{FileEvent, FileEventKind, ListenerRegistry};

/// Decides how a source's document is read, which events reach its
/// [`SourceControl`], and when reparsing must wait.
///
/// One environment exists per source, created lazily on first access. It
/// observes nothing until [`activate`](Self::activate) is called.
///
/// State machine: `Unattached -> Activated` (one way). While activated,
/// [`is_reparse_blocked`](Self::is_reparse_blocked) may flip at any time and
/// is queried afresh before every reset.
#[async_trait]
pub trait SourceEnvironment: Send + Sync {
    /// Returns the editable buffer for `path`.
    ///
    /// `None` when the document is not open and `force_open` is false.
    ///
    /// # Errors
    ///
    /// `ReparseError::Io` when loading the file fails.
    async fn read_document(&self, path: &Path, force_open: bool) -> Result<Option<Arc<Document>>>;

    /// Attaches (`attach == true`) or detaches a scheduler.
    ///
    /// A detached scheduler receives no further events from this
    /// environment.
    fn attach_scheduler(&self, control: SchedulerControl, attach: bool);

    /// Starts forwarding file and parser events to the source's control.
    /// Calling it again has no further effect.
    fn activate(&self);

    /// Whether reparsing must currently wait.
    fn is_reparse_blocked(&self) -> bool;

    /// Delivered for paths registered with
    /// [`EnvironmentSupport::listen_on_file_changes`].
    fn file_changed(&self, event: &FileEvent) {
        let _ = event;
    }

    /// Delivered when the parser for a mime type registered with
    /// [`EnvironmentSupport::listen_on_parser`] changed.
    fn parser_changed(&self, mime_type: &str) {
        let _ = mime_type;
    }

    fn as_any(&self) -> &dyn Any;
}

/// Everything an environment needs at construction.
#[derive(Clone)]
pub struct EnvironmentContext {
    pub source: SourceId,
    pub control: Arc<SourceControl>,
    pub listeners: Arc<ListenerRegistry>,
    pub config: Arc<ParsingConfig>,
}

/// Creates the environment for a source on first access.
pub trait EnvironmentFactory: Send + Sync {
    fn create_environment(&self, context: EnvironmentContext) -> Arc<dyn SourceEnvironment>;
}

/// Shared bookkeeping for environment implementations.
///
/// Handles one-shot activation, listener registration by [`SourceId`],
/// attached schedulers and the default translation of file and parser
/// events into [`SourceControl`] notifications.
pub struct EnvironmentSupport {
    context: EnvironmentContext,
    activated: AtomicBool,
    schedulers: Mutex<Vec<SchedulerControl>>,
    file_registration: Mutex<Option<PathBuf>>,
    parser_registration: Mutex<Option<String>>,
}

impl EnvironmentSupport {
    pub fn new(context: EnvironmentContext) -> Self {
        Self {
            context,
            activated: AtomicBool::new(false),
            schedulers: Mutex::new(Vec::new()),
            file_registration: Mutex::new(None),
            parser_registration: Mutex::new(None),
        }
    }

    pub fn source_id(&self) -> SourceId {
        self.context.source
    }

    pub fn control(&self) -> &Arc<SourceControl> {
        &self.context.control
    }

    pub fn config(&self) -> &ParsingConfig {
        &self.context.config
    }

    /// Marks the environment activated; returns `true` only for the first
    /// call.
    pub fn activate_once(&self) -> bool {
        let first = !self.activated.swap(true, Ordering::AcqRel);
        if first {
            tracing::debug!("Environment for {} activated", self.context.source);
        }
        first
    }

    pub fn is_activated(&self) -> bool {
        self.activated.load(Ordering::Acquire)
    }

    /// Registers the source's current path for file events.
    pub fn listen_on_file_changes(&self) {
        let Some(source) = self.context.control.source() else {
            return;
        };
        let path = source.path();
        let mut registration = self.file_registration.lock();
        if let Some(previous) = registration.as_deref() {
            self.context
                .listeners
                .remove_file_listener(previous, self.context.source);
        }
        self.context
            .listeners
            .add_file_listener(&path, self.context.source);
        *registration = Some(path);
    }

    /// Registers the source's current mime type for parser change events.
    pub fn listen_on_parser(&self) {
        let Some(source) = self.context.control.source() else {
            return;
        };
        let mime_type = source.mime_type();
        let mut registration = self.parser_registration.lock();
        if let Some(previous) = registration.as_deref() {
            self.context
                .listeners
                .remove_parser_listener(previous, self.context.source);
        }
        self.context
            .listeners
            .add_parser_listener(&mime_type, self.context.source);
        *registration = Some(mime_type);
    }

    pub fn attach_scheduler(&self, control: SchedulerControl, attach: bool) {
        let mut schedulers = self.schedulers.lock();
        schedulers.retain(|s| s.id() != control.id());
        if attach {
            schedulers.push(control);
        }
    }

    pub fn scheduler_count(&self) -> usize {
        self.schedulers.lock().len()
    }

    /// Tells every attached scheduler that the source changed identity.
    pub fn notify_schedulers(&self) {
        let schedulers = self.schedulers.lock().clone();
        for scheduler in schedulers {
            scheduler.source_changed(self.context.source);
        }
    }

    /// Default handling of file events.
    ///
    /// Content changes invalidate the source; a rename moves the listener
    /// registration, re-resolves the mime type from the new extension and
    /// notifies attached schedulers.
    pub fn handle_file_event(&self, event: &FileEvent) {
        if !self.is_activated() {
            return;
        }
        let control = &self.context.control;
        match &event.kind {
            FileEventKind::Created | FileEventKind::Changed => control.source_changed(false),
            FileEventKind::Deleted => {
                tracing::debug!("{:?} deleted", event.path);
                control.source_changed(false);
            }
            FileEventKind::Renamed { to } => {
                let Some(source) = control.source() else {
                    return;
                };
                source.set_path(to.clone());
                {
                    let mut registration = self.file_registration.lock();
                    if registration.is_some() {
                        self.context.listeners.move_file_listener(
                            &event.path,
                            to,
                            self.context.source,
                        );
                        *registration = Some(to.clone());
                    }
                }

                let old_mime = source.mime_type();
                let new_mime = self.context.config.mime_for_path(to).to_string();
                let mime_changed = old_mime != new_mime;
                if mime_changed {
                    tracing::debug!(
                        "{} mime type changed: {} -> {}",
                        self.context.source,
                        old_mime,
                        new_mime
                    );
                    source.set_mime_type(new_mime);
                    if self.parser_registration.lock().is_some() {
                        self.listen_on_parser();
                    }
                }
                control.source_changed(mime_changed);
                self.notify_schedulers();
            }
        }
    }

    /// Default handling of parser changes: the cached parser and results
    /// are stale.
    pub fn handle_parser_changed(&self, mime_type: &str) {
        if !self.is_activated() {
            return;
        }
        tracing::debug!("Parser for {} changed, invalidating {}", mime_type, self.context.source);
        self.context.control.source_changed(true);
    }
}
