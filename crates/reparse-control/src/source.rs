//! Sources and the table that owns them.

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use reparse_core::{
    ModificationRegion, ParseResult, Parser, ParserFactory, ParserRegistry, ParsingConfig,
    ReparseDelays, ReparseError, Result, Snapshot, SourceFlags, SourceId,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::Handle;

use crate::control::SourceControl;
use crate::environment::{EnvironmentContext, EnvironmentFactory, SourceEnvironment};
use crate::listeners::{FileEvent, FileEventKind, ListenerRegistry};
use crate::processor::TaskProcessor;

#[derive(Default)]
struct SourceCache {
    snapshot: Option<Snapshot>,
    result: Option<Arc<dyn ParseResult>>,
}

/// One logical document tracked by the parsing runtime.
///
/// Holds the invalidation flags, the resolved parser, the latest snapshot
/// and parse result, and owns its [`SourceControl`]. The environment is
/// created on first call to [`environment`](Self::environment).
///
/// Flags are guarded by their own mutex; every read-modify-write of them is
/// one critical section.
pub struct Source {
    id: SourceId,
    path: RwLock<PathBuf>,
    mime_type: RwLock<String>,
    flags: Mutex<SourceFlags>,
    region: Mutex<Option<ModificationRegion>>,
    parser: Mutex<Option<Arc<dyn Parser>>>,
    cache: Mutex<SourceCache>,
    environment: OnceCell<Arc<dyn SourceEnvironment>>,
    control: Arc<SourceControl>,
    parsers: Arc<ParserRegistry>,
    listeners: Arc<ListenerRegistry>,
    config: Arc<ParsingConfig>,
    factory: Arc<dyn EnvironmentFactory>,
}

impl Source {
    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn path(&self) -> PathBuf {
        self.path.read().clone()
    }

    pub(crate) fn set_path(&self, path: PathBuf) {
        *self.path.write() = path;
    }

    pub fn mime_type(&self) -> String {
        self.mime_type.read().clone()
    }

    /// Changes the mime type without invalidating anything; callers follow
    /// up with `source_changed(true)`.
    pub fn set_mime_type(&self, mime_type: impl Into<String>) {
        *self.mime_type.write() = mime_type.into();
    }

    pub fn control(&self) -> &Arc<SourceControl> {
        &self.control
    }

    pub fn flags(&self) -> SourceFlags {
        *self.flags.lock()
    }

    pub fn is_invalid(&self) -> bool {
        self.flags().contains(SourceFlags::INVALID)
    }

    pub(crate) fn set_flags(&self, flags: SourceFlags) {
        self.flags.lock().insert(flags);
    }

    /// Clears `flags` and returns which of them were set.
    pub(crate) fn test_and_clear_flags(&self, flags: SourceFlags) -> SourceFlags {
        let mut current = self.flags.lock();
        let was = *current & flags;
        current.remove(flags);
        was
    }

    pub fn modification_region(&self) -> Option<ModificationRegion> {
        *self.region.lock()
    }

    pub(crate) fn set_modification_region(&self, region: Option<ModificationRegion>) {
        *self.region.lock() = region;
    }

    /// The environment, created on first call.
    pub fn environment(&self) -> Arc<dyn SourceEnvironment> {
        Arc::clone(self.environment.get_or_init(|| {
            tracing::debug!("Creating environment for {} ({:?})", self.id, self.path());
            self.factory.create_environment(EnvironmentContext {
                source: self.id,
                control: Arc::clone(&self.control),
                listeners: Arc::clone(&self.listeners),
                config: Arc::clone(&self.config),
            })
        }))
    }

    pub fn environment_if_created(&self) -> Option<Arc<dyn SourceEnvironment>> {
        self.environment.get().cloned()
    }

    /// Resolves the parser for the current mime type, caching it until
    /// the mime type changes.
    pub fn parser(&self) -> Option<Arc<dyn Parser>> {
        let mut cached = self.parser.lock();
        if cached.is_none() {
            let mime_type = self.mime_type();
            *cached = self.parsers.parser_for_mime(&mime_type);
            if cached.is_none() {
                tracing::trace!("No parser for {} ({})", self.id, mime_type);
            }
        }
        cached.clone()
    }

    pub(crate) fn invalidate_parser(&self) {
        self.parser.lock().take();
        self.cache.lock().result = None;
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.cache.lock().snapshot.clone()
    }

    pub fn cached_result(&self) -> Option<Arc<dyn ParseResult>> {
        self.cache.lock().result.clone()
    }

    /// Reads the document through the environment and replaces the
    /// snapshot, clearing `INVALID`.
    ///
    /// `INVALID` is cleared before reading so an edit racing with the read
    /// marks the source invalid again. On failure the flag is restored.
    pub async fn refresh_snapshot(&self) -> Result<Snapshot> {
        self.test_and_clear_flags(SourceFlags::INVALID);
        match self.read_snapshot().await {
            Ok(snapshot) => {
                let mut cache = self.cache.lock();
                cache.snapshot = Some(snapshot.clone());
                cache.result = None;
                Ok(snapshot)
            }
            Err(e) => {
                self.set_flags(SourceFlags::INVALID);
                Err(e)
            }
        }
    }

    async fn read_snapshot(&self) -> Result<Snapshot> {
        let path = self.path();
        let document = self
            .environment()
            .read_document(&path, true)
            .await?
            .ok_or_else(|| {
                ReparseError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("document not available: {}", path.display()),
                ))
            })?;
        Ok(document.snapshot(self.id, &self.mime_type()))
    }

    /// Returns the cached parse result or parses the current snapshot.
    ///
    /// # Errors
    ///
    /// `ReparseError::NoParser` when no parser handles the mime type, or
    /// whatever reading or parsing reports.
    pub async fn parse_result(&self) -> Result<Arc<dyn ParseResult>> {
        if let Some(result) = self.cached_result() {
            return Ok(result);
        }
        let snapshot = match self.snapshot() {
            Some(snapshot) => snapshot,
            None => self.refresh_snapshot().await?,
        };
        let parser = self
            .parser()
            .ok_or_else(|| ReparseError::NoParser(snapshot.mime_type.clone()))?;
        let result = parser.parse(&snapshot)?;

        let mut cache = self.cache.lock();
        if cache.snapshot.as_ref() == Some(&snapshot) {
            cache.result = Some(Arc::clone(&result));
        }
        Ok(result)
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.id)
            .field("path", &self.path())
            .field("mime_type", &self.mime_type())
            .field("flags", &self.flags())
            .field("has_environment", &self.environment.get().is_some())
            .finish()
    }
}

/// Owner of every live [`Source`].
///
/// Sources are looked up by id or path. Nothing else holds a source
/// strongly for longer than one operation; [`dispose`](Self::dispose)
/// releases it and everything registered for it.
pub struct SourceTable {
    sources: DashMap<SourceId, Arc<Source>>,
    by_path: DashMap<PathBuf, SourceId>,
    next_id: AtomicU64,
    parsers: Arc<ParserRegistry>,
    listeners: Arc<ListenerRegistry>,
    processor: Arc<TaskProcessor>,
    delays: Arc<ReparseDelays>,
    config: Arc<ParsingConfig>,
    factory: Arc<dyn EnvironmentFactory>,
    runtime: Handle,
}

impl SourceTable {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        parsers: Arc<ParserRegistry>,
        listeners: Arc<ListenerRegistry>,
        processor: Arc<TaskProcessor>,
        delays: Arc<ReparseDelays>,
        config: Arc<ParsingConfig>,
        factory: Arc<dyn EnvironmentFactory>,
        runtime: Handle,
    ) -> Self {
        Self {
            sources: DashMap::new(),
            by_path: DashMap::new(),
            next_id: AtomicU64::new(1),
            parsers,
            listeners,
            processor,
            delays,
            config,
            factory,
            runtime,
        }
    }

    /// Returns the source for `path`, creating it with the mime type
    /// resolved from the extension.
    pub fn get_or_create(&self, path: &Path) -> Arc<Source> {
        let mime_type = self.config.mime_for_path(path).to_string();
        self.get_or_create_with_mime(path, &mime_type)
    }

    /// Returns the source for `path`, creating it with `mime_type`.
    ///
    /// An existing source keeps its mime type.
    pub fn get_or_create_with_mime(&self, path: &Path, mime_type: &str) -> Arc<Source> {
        let id = *self
            .by_path
            .entry(path.to_path_buf())
            .or_insert_with(|| SourceId::new(self.next_id.fetch_add(1, Ordering::Relaxed)));

        Arc::clone(
            &self
                .sources
                .entry(id)
                .or_insert_with(|| self.create_source(id, path, mime_type)),
        )
    }

    fn create_source(&self, id: SourceId, path: &Path, mime_type: &str) -> Arc<Source> {
        tracing::debug!("Creating source {} for {:?} ({})", id, path, mime_type);
        Arc::new_cyclic(|weak| Source {
            id,
            path: RwLock::new(path.to_path_buf()),
            mime_type: RwLock::new(mime_type.to_string()),
            flags: Mutex::new(SourceFlags::empty()),
            region: Mutex::new(None),
            parser: Mutex::new(None),
            cache: Mutex::new(SourceCache::default()),
            environment: OnceCell::new(),
            control: Arc::new(SourceControl::new(
                weak.clone(),
                id,
                Arc::clone(&self.processor),
                Arc::clone(&self.delays),
                self.runtime.clone(),
            )),
            parsers: Arc::clone(&self.parsers),
            listeners: Arc::clone(&self.listeners),
            config: Arc::clone(&self.config),
            factory: Arc::clone(&self.factory),
        })
    }

    pub fn get(&self, id: SourceId) -> Option<Arc<Source>> {
        self.sources.get(&id).map(|s| Arc::clone(&s))
    }

    /// Like [`get`](Self::get) but reports a missing source as an error.
    pub fn require(&self, id: SourceId) -> Result<Arc<Source>> {
        self.get(id).ok_or(ReparseError::UnknownSource(id))
    }

    pub fn find(&self, path: &Path) -> Option<Arc<Source>> {
        let id = *self.by_path.get(path)?;
        self.get(id)
    }

    /// Releases a source: drops its listener registrations and scheduled
    /// tasks and cancels its pending reset.
    pub fn dispose(&self, id: SourceId) -> Option<Arc<Source>> {
        let (_, source) = self.sources.remove(&id)?;
        self.by_path.retain(|_, v| *v != id);
        source.control().cancel_pending_reset();
        self.listeners.deregister(id);
        self.processor.remove_source(id);
        tracing::debug!("Disposed source {}", id);
        Some(source)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Delivers a filesystem event to every source listening on its path.
    ///
    /// The path index follows a rename only for sources whose environment
    /// moved them to the new path.
    pub fn fire_file_event(&self, event: &FileEvent) {
        for id in self.listeners.file_listeners(&event.path) {
            match self.get(id) {
                Some(source) => {
                    if let Some(environment) = source.environment_if_created() {
                        environment.file_changed(event);
                    }
                    if let FileEventKind::Renamed { to } = &event.kind
                        && source.path() == *to
                    {
                        self.move_path(&event.path, to, id);
                    }
                }
                None => tracing::trace!("Stale file listener {} for {:?}", id, event.path),
            }
        }
    }

    /// Re-keys `id` from `from` to `to`. A different source registered at
    /// `to` lost its file to the rename and is disposed.
    fn move_path(&self, from: &Path, to: &Path, id: SourceId) {
        self.by_path.remove_if(from, |_, v| *v == id);
        if let Some(displaced) = self.by_path.insert(to.to_path_buf(), id)
            && displaced != id
        {
            tracing::debug!("{:?} replaced by a rename, disposing {}", to, displaced);
            self.dispose(displaced);
        }
    }

    /// Delivers a parser change to every source listening on `mime_type`.
    pub fn fire_parser_changed(&self, mime_type: &str) {
        for id in self.listeners.parser_listeners(mime_type) {
            if let Some(environment) = self.get(id).and_then(|s| s.environment_if_created()) {
                environment.parser_changed(mime_type);
            }
        }
    }

    /// Registers a parser factory and notifies sources of its mime types.
    pub fn register_parser(&self, factory: Arc<dyn ParserFactory>) {
        for mime_type in self.parsers.register(factory) {
            self.fire_parser_changed(&mime_type);
        }
    }
}
