//! Top-level runtime state.

use reparse_core::{
    Document, ParserFactory, ParserRegistry, ParsingConfig, ReparseDelays, ReparseError, Result,
    SchedulerTask,
};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::environment::EnvironmentFactory;
use crate::file_environment::{
    FileEnvironment, FileEnvironmentFactory, InteractiveSession, OpenDocuments,
};
use crate::listeners::{FileEvent, ListenerRegistry};
use crate::processor::TaskProcessor;
use crate::source::{Source, SourceTable};

/// Shared state of the reparse runtime.
///
/// Owns every registry and the task processor. Must be created inside a
/// tokio runtime; the runtime handle is captured for all timers and
/// background work.
pub struct ParsingState {
    pub config: Arc<ParsingConfig>,
    pub delays: Arc<ReparseDelays>,
    pub parsers: Arc<ParserRegistry>,
    pub listeners: Arc<ListenerRegistry>,
    pub processor: Arc<TaskProcessor>,
    pub sources: Arc<SourceTable>,
    /// Editor buffers. Only consulted by the default file environment.
    pub documents: Arc<OpenDocuments>,
}

impl ParsingState {
    /// Creates the runtime with disk-backed environments.
    ///
    /// # Errors
    ///
    /// - `ReparseError::Runtime` - called outside a tokio runtime
    /// - `ReparseError::InvalidDelays` - immediate delay exceeds the
    ///   standard one
    pub fn new(config: ParsingConfig) -> Result<Self> {
        let documents = Arc::new(OpenDocuments::new());
        let factory = Arc::new(FileEnvironmentFactory::new(Arc::clone(&documents)));
        Self::build(config, documents, factory)
    }

    /// Creates the runtime with a custom environment per source.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_environment_factory(
        config: ParsingConfig,
        factory: Arc<dyn EnvironmentFactory>,
    ) -> Result<Self> {
        Self::build(config, Arc::new(OpenDocuments::new()), factory)
    }

    fn build(
        config: ParsingConfig,
        documents: Arc<OpenDocuments>,
        factory: Arc<dyn EnvironmentFactory>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| ReparseError::Runtime(e.to_string()))?;
        let delays = Arc::new(ReparseDelays::from_config(&config)?);
        let config = Arc::new(config);
        let parsers = Arc::new(ParserRegistry::new());
        let listeners = Arc::new(ListenerRegistry::new());
        let processor = Arc::new(TaskProcessor::new(
            runtime.clone(),
            config.slow_cancel_limit(),
        ));
        processor.initialize();

        let sources = Arc::new(SourceTable::new(
            Arc::clone(&parsers),
            Arc::clone(&listeners),
            Arc::clone(&processor),
            Arc::clone(&delays),
            Arc::clone(&config),
            factory,
            runtime,
        ));

        tracing::debug!(
            "Parsing state ready (reparse delay {:?}, immediate {:?})",
            delays.reparse_delay(false),
            delays.reparse_delay(true)
        );

        Ok(Self {
            config,
            delays,
            parsers,
            listeners,
            processor,
            sources,
            documents,
        })
    }

    /// Opens an editor buffer for `path` and activates its source.
    ///
    /// The source is invalidated so the next reset snapshots the buffer.
    pub fn open_document(
        &self,
        path: &Path,
        text: impl Into<String>,
    ) -> (Arc<Source>, Arc<Document>) {
        let document = self.documents.open(path, text);
        let source = self.sources.get_or_create(path);
        source.environment().activate();
        source.control().source_changed(false);
        (source, document)
    }

    /// Applies an edit to an open buffer and reports the changed region.
    ///
    /// # Errors
    ///
    /// `ReparseError::Io` with `NotFound` when the document is not open.
    pub fn edit_document(&self, path: &Path, start: usize, end: usize, insert: &str) -> Result<()> {
        let document = self.documents.get(path).ok_or_else(|| {
            ReparseError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("document not open: {}", path.display()),
            ))
        })?;
        document.edit(start, end, insert);

        let source = self.sources.get_or_create(path);
        let start = i64::try_from(start).unwrap_or(i64::MAX);
        let end = start.saturating_add(i64::try_from(insert.len()).unwrap_or(i64::MAX));
        source.control().region_changed(start, end);
        Ok(())
    }

    /// Closes the buffer and disposes its source.
    pub fn close_document(&self, path: &Path) {
        self.documents.close(path);
        if let Some(source) = self.sources.find(path) {
            self.sources.dispose(source.id());
        }
    }

    pub fn source(&self, path: &Path) -> Option<Arc<Source>> {
        self.sources.find(path)
    }

    /// Schedules `tasks` for the source at `path`, creating and activating
    /// it if needed.
    pub fn schedule_tasks(&self, path: &Path, tasks: Vec<Arc<dyn SchedulerTask>>) -> Arc<Source> {
        let source = self.sources.get_or_create(path);
        source.environment().activate();
        self.processor.add_tasks(&source, tasks);
        source
    }

    /// Registers a parser factory; sources listening on its mime types
    /// are invalidated.
    pub fn register_parser(&self, factory: Arc<dyn ParserFactory>) {
        tracing::info!("Registering parser {}", factory.id());
        self.sources.register_parser(factory);
    }

    /// Delivers a filesystem event to the sources listening on its path.
    pub fn file_event(&self, event: &FileEvent) {
        self.sources.fire_file_event(event);
    }

    /// Starts an interactive session on the source at `path`.
    ///
    /// `None` when the source's environment is not a [`FileEnvironment`].
    pub fn begin_interactive_session(&self, path: &Path) -> Option<InteractiveSession> {
        let source = self.sources.get_or_create(path);
        let environment = source.environment();
        environment
            .as_any()
            .downcast_ref::<FileEnvironment>()
            .map(FileEnvironment::begin_interactive_session)
    }
}

impl std::fmt::Debug for ParsingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsingState")
            .field("sources", &self.sources.len())
            .field("documents", &self.documents.len())
            .field("parsers", &self.parsers.factory_ids())
            .field("processor", &self.processor)
            .finish()
    }
}
