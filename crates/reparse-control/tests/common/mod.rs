//! Shared fixtures for integration tests.
//!
//! Provides an environment whose blocking policy tests can flip, a parser
//! factory that counts parser creations and a task that records its runs.

#![allow(dead_code)] // Each test binary uses a subset

use async_trait::async_trait;
use parking_lot::Mutex;
use reparse_control::{
    EnvironmentContext, EnvironmentFactory, EnvironmentSupport, FileEvent, OpenDocuments,
    ParsingState, Source, SourceEnvironment,
};
use reparse_core::{
    CancelReason, Document, ParseResult, Parser, ParserFactory, ParsingConfig, ReschedulePolicy,
    Result, SchedulerControl, SchedulerTask, Snapshot,
};
use std::any::Any;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

pub(crate) const JAVA: &str = "text/x-java";

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Environment with a switchable blocking policy.
///
/// Every reset queries `is_reparse_blocked` exactly once, so the recorded
/// query instants are the instants resets fired.
pub(crate) struct TestEnvironment {
    support: EnvironmentSupport,
    documents: Arc<OpenDocuments>,
    pub blocked: AtomicBool,
    queries: Mutex<Vec<Instant>>,
}

impl TestEnvironment {
    pub(crate) fn support(&self) -> &EnvironmentSupport {
        &self.support
    }

    pub(crate) fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
    }

    pub(crate) fn reset_count(&self) -> usize {
        self.queries.lock().len()
    }

    pub(crate) fn reset_instants(&self) -> Vec<Instant> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl SourceEnvironment for TestEnvironment {
    async fn read_document(&self, path: &Path, _force_open: bool) -> Result<Option<Arc<Document>>> {
        Ok(Some(
            self.documents
                .get(path)
                .unwrap_or_else(|| Arc::new(Document::new(""))),
        ))
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
        self.queries.lock().push(Instant::now());
        self.blocked.load(Ordering::SeqCst)
    }

    fn file_changed(&self, event: &FileEvent) {
        self.support.handle_file_event(event);
    }

    fn parser_changed(&self, mime_type: &str) {
        self.support.handle_parser_changed(mime_type);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) struct TestEnvironmentFactory {
    pub documents: Arc<OpenDocuments>,
}

impl EnvironmentFactory for TestEnvironmentFactory {
    fn create_environment(&self, context: EnvironmentContext) -> Arc<dyn SourceEnvironment> {
        Arc::new(TestEnvironment {
            support: EnvironmentSupport::new(context),
            documents: Arc::clone(&self.documents),
            blocked: AtomicBool::new(false),
            queries: Mutex::new(Vec::new()),
        })
    }
}

/// State whose sources get [`TestEnvironment`]s.
pub(crate) fn test_state() -> (ParsingState, Arc<OpenDocuments>) {
    test_state_with(ParsingConfig::default())
}

pub(crate) fn test_state_with(config: ParsingConfig) -> (ParsingState, Arc<OpenDocuments>) {
    init_tracing();
    let documents = Arc::new(OpenDocuments::new());
    let factory = Arc::new(TestEnvironmentFactory {
        documents: Arc::clone(&documents),
    });
    let state = ParsingState::with_environment_factory(config, factory).unwrap();
    (state, documents)
}

/// Creates the source at `path` and its (activated) test environment.
pub(crate) fn test_source(state: &ParsingState, path: &str) -> Arc<Source> {
    let source = state.sources.get_or_create(Path::new(path));
    source.environment().activate();
    source
}

/// Runs `f` against the source's environment as a [`TestEnvironment`].
pub(crate) fn with_test_environment<R>(
    source: &Source,
    f: impl FnOnce(&TestEnvironment) -> R,
) -> R {
    let environment = source.environment();
    let test = environment
        .as_any()
        .downcast_ref::<TestEnvironment>()
        .expect("source environment is not a TestEnvironment");
    f(test)
}

pub(crate) struct TextResult {
    snapshot: Snapshot,
}

impl ParseResult for TextResult {
    fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct TextParser {
    parses: Arc<AtomicUsize>,
}

impl Parser for TextParser {
    fn parse(&self, snapshot: &Snapshot) -> Result<Arc<dyn ParseResult>> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(TextResult {
            snapshot: snapshot.clone(),
        }))
    }
}

/// Parser factory for Java sources counting parser creations and parses.
#[derive(Default)]
pub(crate) struct CountingParserFactory {
    pub created: AtomicUsize,
    pub parses: Arc<AtomicUsize>,
}

impl CountingParserFactory {
    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn parses(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }
}

impl ParserFactory for CountingParserFactory {
    fn id(&self) -> &'static str {
        "counting-java"
    }

    fn mime_types(&self) -> &[&'static str] {
        &[JAVA]
    }

    fn create_parser(&self) -> Arc<dyn Parser> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Arc::new(TextParser {
            parses: Arc::clone(&self.parses),
        })
    }
}

/// Task recording every run, start and cancellation.
pub(crate) struct RecordingTask {
    name: &'static str,
    priority: i32,
    policy: ReschedulePolicy,
    /// Time spent inside `run` before it completes.
    hold: Duration,
    pub started: AtomicUsize,
    pub completed: AtomicUsize,
    pub texts: Mutex<Vec<String>>,
    pub cancels: Mutex<Vec<CancelReason>>,
    order: Option<Arc<Mutex<Vec<&'static str>>>>,
}

impl RecordingTask {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            priority: 100,
            policy: ReschedulePolicy::OnChange,
            hold: Duration::ZERO,
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            order: None,
        }
    }

    pub(crate) fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub(crate) fn once(mut self) -> Self {
        self.policy = ReschedulePolicy::Once;
        self
    }

    pub(crate) fn holding(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub(crate) fn logging_to(mut self, order: Arc<Mutex<Vec<&'static str>>>) -> Self {
        self.order = Some(order);
        self
    }

    pub(crate) fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchedulerTask for RecordingTask {
    fn name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn reschedule_policy(&self) -> ReschedulePolicy {
        self.policy
    }

    async fn run(&self, result: Arc<dyn ParseResult>) {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(order) = &self.order {
            order.lock().push(self.name);
        }
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }
        self.texts.lock().push(result.snapshot().text.to_string());
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel(&self, reason: CancelReason) {
        self.cancels.lock().push(reason);
    }
}

/// Upcasts for `add_tasks` / `remove_tasks`.
pub(crate) fn task(task: &Arc<RecordingTask>) -> Arc<dyn SchedulerTask> {
    Arc::clone(task) as Arc<dyn SchedulerTask>
}

/// Lets every timer up to `duration` fire on a paused clock.
pub(crate) async fn settle(duration: Duration) {
    tokio::time::sleep(duration).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
