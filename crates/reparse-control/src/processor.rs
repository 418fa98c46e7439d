//! Background task processor.
//!
//! A single worker pulls requests from a priority queue, obtains the
//! source's parse result and runs the task. Requests whose source is
//! invalid, expecting a change or suspended are parked per source until
//! the source's next reset (or resume) moves them back.
//!
//! [`TaskProcessor::run_user_task`] holds the worker back entirely while a
//! caller works under the parser lock.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use reparse_core::{
    CancelReason, ReparseError, ReschedulePolicy, Result, SchedulerTask, SourceFlags, SourceId,
    same_task,
};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};

use crate::source::Source;

#[derive(Clone)]
struct Request {
    seq: u64,
    priority: i32,
    source_id: SourceId,
    source: Weak<Source>,
    task: Arc<dyn SchedulerTask>,
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Request {}

impl PartialOrd for Request {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap is a max-heap: the request with the lowest priority value and
// then the lowest sequence number compares greatest.
impl Ord for Request {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Running {
    request: Request,
    abort: AbortHandle,
}

#[derive(Default)]
struct Queues {
    pending: BinaryHeap<Request>,
    waiting: HashMap<SourceId, Vec<Request>>,
    finished: HashMap<SourceId, Vec<Request>>,
    suspended: HashSet<SourceId>,
    running: Option<Running>,
    cancelled: Option<Arc<dyn SchedulerTask>>,
    user_tasks: usize,
    next_seq: u64,
}

impl Queues {
    fn request(&mut self, source: &Arc<Source>, task: Arc<dyn SchedulerTask>) -> Request {
        self.next_seq += 1;
        Request {
            seq: self.next_seq,
            priority: task.priority(),
            source_id: source.id(),
            source: Arc::downgrade(source),
            task,
        }
    }

    fn park(&mut self, request: Request) {
        self.waiting
            .entry(request.source_id)
            .or_default()
            .push(request);
    }

    fn unpark(&mut self, source: SourceId) {
        if let Some(requests) = self.waiting.remove(&source) {
            self.pending.extend(requests);
        }
    }
}

enum Outcome {
    Ran,
    Skipped,
}

struct Inner {
    queues: Mutex<Queues>,
    wake: Notify,
    parser_lock: tokio::sync::Mutex<()>,
    slow_cancel_limit: Duration,
}

/// Schedules and runs [`SchedulerTask`]s for sources.
///
/// Also the process-wide suspend/resume switch: see
/// [`suspend_scheduler_tasks`](Self::suspend_scheduler_tasks) and
/// [`resume_scheduler_tasks`](Self::resume_scheduler_tasks).
pub struct TaskProcessor {
    inner: Arc<Inner>,
    worker: OnceCell<JoinHandle<()>>,
    runtime: Handle,
}

impl TaskProcessor {
    pub fn new(runtime: Handle, slow_cancel_limit: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(Queues::default()),
                wake: Notify::new(),
                parser_lock: tokio::sync::Mutex::new(()),
                slow_cancel_limit,
            }),
            worker: OnceCell::new(),
            runtime,
        }
    }

    /// Starts the background worker. Later calls do nothing.
    pub fn initialize(&self) {
        self.worker.get_or_init(|| {
            tracing::debug!("Starting task processor worker");
            let inner = Arc::clone(&self.inner);
            let runtime = self.runtime.clone();
            self.runtime.spawn(run_worker(inner, runtime))
        });
    }

    pub fn is_initialized(&self) -> bool {
        self.worker.get().is_some()
    }

    /// Schedules `tasks` for `source`.
    ///
    /// If the running task has a lower priority than the best new one, it
    /// is cancelled and requeued.
    pub fn add_tasks(&self, source: &Arc<Source>, tasks: Vec<Arc<dyn SchedulerTask>>) {
        if tasks.is_empty() {
            return;
        }
        let best = tasks.iter().map(|t| t.priority()).min().unwrap_or(i32::MAX);
        {
            let mut queues = self.inner.queues.lock();
            for task in tasks {
                tracing::trace!("Scheduling {} for {}", task.name(), source.id());
                let request = queues.request(source, task);
                queues.pending.push(request);
            }
        }
        if let Some(request) = self.cancel_running(
            |running| running.priority > best,
            CancelReason::HigherPriorityTask,
        ) {
            self.inner.queues.lock().pending.push(request);
        }
        self.inner.wake.notify_one();
    }

    /// Removes every scheduled copy of `tasks` for `source`, cancelling a
    /// running one.
    pub fn remove_tasks(&self, source: SourceId, tasks: &[Arc<dyn SchedulerTask>]) {
        let matches =
            |r: &Request| r.source_id == source && tasks.iter().any(|t| same_task(t, &r.task));
        {
            let mut guard = self.inner.queues.lock();
            let queues = &mut *guard;
            queues.pending.retain(|r| !matches(r));
            for table in [&mut queues.waiting, &mut queues.finished] {
                if let Some(requests) = table.get_mut(&source) {
                    requests.retain(|r| !matches(r));
                    if requests.is_empty() {
                        table.remove(&source);
                    }
                }
            }
        }
        self.cancel_running(matches, CancelReason::Removed);
    }

    /// Runs finished `tasks` of `source` again. Tasks that have not run
    /// yet are left alone; a running one is cancelled and requeued.
    pub fn reschedule_tasks(&self, source: SourceId, tasks: &[Arc<dyn SchedulerTask>]) {
        let cancelled = self.cancel_running(
            |r| r.source_id == source && tasks.iter().any(|t| same_task(t, &r.task)),
            CancelReason::Removed,
        );
        let mut queues = self.inner.queues.lock();
        if let Some(request) = cancelled {
            queues.pending.push(request);
        }
        if let Some(finished) = queues.finished.remove(&source) {
            let (again, keep): (Vec<_>, Vec<_>) = finished
                .into_iter()
                .partition(|r| tasks.iter().any(|t| same_task(t, &r.task)));
            queues.pending.extend(again);
            if !keep.is_empty() {
                queues.finished.insert(source, keep);
            }
        }
        drop(queues);
        self.inner.wake.notify_one();
    }

    /// Whether `task` is the most recently cancelled one.
    pub fn is_cancelled(&self, task: &Arc<dyn SchedulerTask>) -> bool {
        self.inner
            .queues
            .lock()
            .cancelled
            .as_ref()
            .is_some_and(|c| same_task(c, task))
    }

    /// Cancels the task running for `source` because its content changed.
    ///
    /// The request waits for the source's next reset.
    pub fn reset_state(&self, source: SourceId) {
        if let Some(request) = self.cancel_running(
            |r| r.source_id == source,
            CancelReason::SourceModification,
        ) {
            self.inner.queues.lock().park(request);
        }
    }

    /// Requeues the source's waiting requests, and its finished ones when
    /// `reschedule_finished`. Called by the source's reset.
    pub fn reset_state_impl(&self, source: SourceId, reschedule_finished: bool) {
        let mut queues = self.inner.queues.lock();
        if reschedule_finished && let Some(finished) = queues.finished.remove(&source) {
            tracing::trace!("Rescheduling {} finished tasks of {}", finished.len(), source);
            queues.pending.extend(finished);
        }
        if !queues.suspended.contains(&source) {
            queues.unpark(source);
        }
        drop(queues);
        self.inner.wake.notify_one();
    }

    /// Stops tasks of `source` until [`resume_scheduler_tasks`] is called.
    ///
    /// Best effort: the running task is told to cancel and its future is
    /// aborted at its next await point.
    ///
    /// [`resume_scheduler_tasks`]: Self::resume_scheduler_tasks
    pub fn suspend_scheduler_tasks(&self, source: SourceId) {
        self.inner.queues.lock().suspended.insert(source);
        tracing::debug!("Scheduler tasks suspended for {}", source);
        if let Some(request) =
            self.cancel_running(|r| r.source_id == source, CancelReason::Suspended)
        {
            self.inner.queues.lock().park(request);
        }
    }

    /// Resumes every suspended source.
    pub fn resume_scheduler_tasks(&self) {
        let mut queues = self.inner.queues.lock();
        let suspended: Vec<SourceId> = queues.suspended.drain().collect();
        for source in &suspended {
            queues.unpark(*source);
        }
        drop(queues);
        if !suspended.is_empty() {
            tracing::debug!("Scheduler tasks resumed for {} sources", suspended.len());
        }
        self.inner.wake.notify_one();
    }

    pub fn is_suspended(&self, source: SourceId) -> bool {
        self.inner.queues.lock().suspended.contains(&source)
    }

    /// Drops everything scheduled for a disposed source.
    pub fn remove_source(&self, source: SourceId) {
        {
            let mut queues = self.inner.queues.lock();
            queues.pending.retain(|r| r.source_id != source);
            queues.waiting.remove(&source);
            queues.finished.remove(&source);
            queues.suspended.remove(&source);
        }
        self.cancel_running(|r| r.source_id == source, CancelReason::Removed);
    }

    /// Runs `task` under the parser lock with background work held back.
    ///
    /// The running background request is cancelled with
    /// [`CancelReason::UserTask`] and requeued once `task` completes; no
    /// other request starts in between. Invalid `sources` get a fresh
    /// snapshot before `task` starts. A single source also has its
    /// environment activated.
    ///
    /// Not reentrant: calling it again from inside `task` never completes.
    pub async fn run_user_task<F, Fut, T>(&self, sources: &[Arc<Source>], task: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let [source] = sources {
            source.environment().activate();
        }
        self.inner.queues.lock().user_tasks += 1;
        let _hold = UserTaskHold {
            inner: Arc::clone(&self.inner),
            cancelled: self.cancel_running(|_| true, CancelReason::UserTask),
        };

        let _lock = self.inner.parser_lock.lock().await;
        for source in sources {
            if source.is_invalid()
                && let Err(e) = source.refresh_snapshot().await
            {
                tracing::warn!("Failed to refresh {} for user task: {}", source.id(), e);
            }
        }
        tracing::trace!("Running user task over {} sources", sources.len());
        task().await
    }

    /// Whether a user task currently holds background work back.
    pub fn is_user_task_running(&self) -> bool {
        self.inner.queues.lock().user_tasks > 0
    }

    pub fn pending_count(&self) -> usize {
        self.inner.queues.lock().pending.len()
    }

    pub fn waiting_count(&self, source: SourceId) -> usize {
        self.inner
            .queues
            .lock()
            .waiting
            .get(&source)
            .map_or(0, Vec::len)
    }

    pub fn finished_count(&self, source: SourceId) -> usize {
        self.inner
            .queues
            .lock()
            .finished
            .get(&source)
            .map_or(0, Vec::len)
    }

    /// Cancels the running request if `matches` accepts it and returns it
    /// for the caller to requeue or drop.
    fn cancel_running(
        &self,
        matches: impl Fn(&Request) -> bool,
        reason: CancelReason,
    ) -> Option<Request> {
        let running = {
            let mut queues = self.inner.queues.lock();
            if !queues.running.as_ref().is_some_and(|r| matches(&r.request)) {
                return None;
            }
            let running = queues.running.take()?;
            queues.cancelled = Some(Arc::clone(&running.request.task));
            running
        };

        let started = Instant::now();
        running.request.task.cancel(reason);
        running.abort.abort();
        let elapsed = started.elapsed();
        if elapsed > self.inner.slow_cancel_limit {
            tracing::warn!(
                "Task {} took {:?} to cancel ({})",
                running.request.task.name(),
                elapsed,
                reason
            );
        } else {
            tracing::trace!("Cancelled {} ({})", running.request.task.name(), reason);
        }
        Some(running.request)
    }
}

/// Releases the worker when a user task completes or is dropped.
struct UserTaskHold {
    inner: Arc<Inner>,
    cancelled: Option<Request>,
}

impl Drop for UserTaskHold {
    fn drop(&mut self) {
        let mut queues = self.inner.queues.lock();
        queues.user_tasks -= 1;
        if let Some(request) = self.cancelled.take() {
            queues.pending.push(request);
        }
        drop(queues);
        self.inner.wake.notify_one();
    }
}

impl Drop for TaskProcessor {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get() {
            worker.abort();
        }
        if let Some(running) = self.inner.queues.lock().running.take() {
            running.abort.abort();
        }
    }
}

impl std::fmt::Debug for TaskProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queues = self.inner.queues.lock();
        f.debug_struct("TaskProcessor")
            .field("initialized", &self.worker.get().is_some())
            .field("pending", &queues.pending.len())
            .field("waiting_sources", &queues.waiting.len())
            .field("finished_sources", &queues.finished.len())
            .field("suspended", &queues.suspended.len())
            .finish()
    }
}

async fn run_worker(inner: Arc<Inner>, runtime: Handle) {
    loop {
        while let Some((request, handle)) = start_next(&inner, &runtime) {
            let outcome = handle.await;
            let mut queues = inner.queues.lock();
            let still_ours = queues
                .running
                .as_ref()
                .is_some_and(|r| r.request.seq == request.seq);
            if !still_ours {
                // Cancelled; whoever cancelled it requeued or dropped it.
                continue;
            }
            queues.running = None;
            match outcome {
                Ok(Outcome::Ran | Outcome::Skipped) => {
                    if request.task.reschedule_policy() == ReschedulePolicy::OnChange {
                        queues
                            .finished
                            .entry(request.source_id)
                            .or_default()
                            .push(request);
                    }
                }
                Err(e) if e.is_panic() => {
                    tracing::error!("Task {} panicked", request.task.name());
                }
                Err(_) => {}
            }
        }
        inner.wake.notified().await;
    }
}

/// Pops the next runnable request and spawns it, parking requests that
/// cannot run yet.
fn start_next(inner: &Arc<Inner>, runtime: &Handle) -> Option<(Request, JoinHandle<Outcome>)> {
    let mut queues = inner.queues.lock();
    if queues.user_tasks > 0 {
        return None;
    }
    while let Some(request) = queues.pending.pop() {
        let Some(source) = request.source.upgrade() else {
            continue;
        };
        if queues.suspended.contains(&request.source_id)
            || source
                .flags()
                .intersects(SourceFlags::INVALID | SourceFlags::CHANGE_EXPECTED)
        {
            queues.park(request);
            continue;
        }

        queues.cancelled = None;
        let handle = runtime.spawn(process(source, Arc::clone(&request.task)));
        queues.running = Some(Running {
            request: request.clone(),
            abort: handle.abort_handle(),
        });
        return Some((request, handle));
    }
    None
}

async fn process(source: Arc<Source>, task: Arc<dyn SchedulerTask>) -> Outcome {
    let result = match source.parse_result().await {
        Ok(result) => result,
        Err(ReparseError::NoParser(mime_type)) => {
            tracing::debug!(
                "No parser for {} ({}), skipping {}",
                source.id(),
                mime_type,
                task.name()
            );
            return Outcome::Skipped;
        }
        Err(e) => {
            tracing::warn!("Failed to parse {}: {}", source.id(), e);
            return Outcome::Skipped;
        }
    };
    tracing::trace!("Running {} on {}", task.name(), source.id());
    task.run(result).await;
    Outcome::Ran
}
