//! Mutation notifications for one source and its debounced reset.
//!
//! Editors call [`SourceControl`] when a source changes. Each call updates
//! the source's flags, cancels work that is now stale and (re)arms a single
//! reset timer. When the timer fires, the reset checks the environment's
//! blocking policy, refreshes the snapshot and requeues the source's tasks.

use parking_lot::Mutex;
use reparse_core::{ModificationRegion, ReparseDelays, SourceFlags, SourceId};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::processor::TaskProcessor;
use crate::source::Source;

/// Mutation-notification facade owned by a [`Source`].
///
/// None of the notification methods block or fail. They only record state
/// and schedule work on the runtime captured at construction, so they may be
/// called from any thread.
///
/// At most one reset timer is pending per source: scheduling a new reset
/// aborts the pending one.
pub struct SourceControl {
    source: Weak<Source>,
    id: SourceId,
    processor: Arc<TaskProcessor>,
    delays: Arc<ReparseDelays>,
    runtime: Handle,
    pending_reset: Mutex<Option<JoinHandle<()>>>,
}

impl SourceControl {
    pub(crate) fn new(
        source: Weak<Source>,
        id: SourceId,
        processor: Arc<TaskProcessor>,
        delays: Arc<ReparseDelays>,
        runtime: Handle,
    ) -> Self {
        Self {
            source,
            id,
            processor,
            delays,
            runtime,
            pending_reset: Mutex::new(None),
        }
    }

    pub fn source_id(&self) -> SourceId {
        self.id
    }

    /// The controlled source, unless it has been dropped.
    pub fn source(&self) -> Option<Arc<Source>> {
        self.source.upgrade()
    }

    pub fn reparse_delay(&self, fast: bool) -> Duration {
        self.delays.reparse_delay(fast)
    }

    /// The whole source changed.
    ///
    /// Marks it invalid, drops the resolved parser when `mime_changed`,
    /// cancels its running task and schedules a reset after the immediate
    /// delay. Finished tasks run again after the reset.
    pub fn source_changed(&self, mime_changed: bool) {
        let Some(source) = self.source() else {
            return;
        };
        tracing::trace!("{} changed (mime changed: {})", self.id, mime_changed);
        source.set_modification_region(None);
        source.set_flags(SourceFlags::INVALID | SourceFlags::RESCHEDULE_FINISHED_TASKS);
        if mime_changed {
            source.invalidate_parser();
        }
        self.processor.reset_state(self.id);
        self.schedule_reset(self.delays.reparse_delay(true));
    }

    /// The range `start..end` changed.
    ///
    /// A negative offset means the range is unknown and behaves exactly like
    /// `source_changed(false)`.
    pub fn region_changed(&self, start: i64, end: i64) {
        let Some(region) = ModificationRegion::from_offsets(start, end) else {
            self.source_changed(false);
            return;
        };
        let Some(source) = self.source() else {
            return;
        };
        tracing::trace!("{} changed in {}..{}", self.id, region.start, region.end);
        source.set_modification_region(Some(region));
        source.set_flags(SourceFlags::INVALID | SourceFlags::RESCHEDULE_FINISHED_TASKS);
        self.processor.reset_state(self.id);
        self.schedule_reset(self.delays.reparse_delay(false));
    }

    /// Something other than content changed (caret moved, focus changed).
    ///
    /// Parse results stay valid; finished tasks run again against them
    /// after the standard delay.
    pub fn state_changed(&self) {
        let Some(source) = self.source() else {
            return;
        };
        source.set_flags(SourceFlags::RESCHEDULE_FINISHED_TASKS);
        self.schedule_reset(self.delays.reparse_delay(false));
    }

    /// Announces an imminent modification; tasks for the source do not
    /// start until the next reset.
    pub fn expect_change(&self) {
        if let Some(source) = self.source() {
            source.set_flags(SourceFlags::CHANGE_EXPECTED);
        }
    }

    /// Schedules a reset after `delay`, replacing any pending one.
    pub fn revalidate(&self, delay: Duration) {
        self.schedule_reset(delay);
    }

    /// Whether a reset timer is armed and has not fired yet.
    pub fn has_pending_reset(&self) -> bool {
        self.pending_reset
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn schedule_reset(&self, delay: Duration) {
        let source = Weak::clone(&self.source);
        let processor = Arc::clone(&self.processor);
        let id = self.id;

        let mut pending = self.pending_reset.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(source) = source.upgrade() else {
                return;
            };
            tracing::trace!("{} reset fired after {:?}", id, delay);
            // Detached so a later reschedule cannot abort a reset that is
            // already reading the document.
            tokio::spawn(reset(source, processor));
        }));
    }

    /// Disarms the pending reset timer, if any.
    pub(crate) fn cancel_pending_reset(&self) {
        if let Some(pending) = self.pending_reset.lock().take() {
            pending.abort();
        }
    }
}

impl Drop for SourceControl {
    fn drop(&mut self) {
        if let Some(pending) = self.pending_reset.get_mut().take() {
            pending.abort();
        }
    }
}

impl std::fmt::Debug for SourceControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceControl")
            .field("source", &self.id)
            .field("has_pending_reset", &self.has_pending_reset())
            .finish()
    }
}

/// Runs one reset for `source`.
///
/// Returns without touching any flag while the environment blocks
/// reparsing; the environment calls `revalidate` again once unblocked.
async fn reset(source: Arc<Source>, processor: Arc<TaskProcessor>) {
    if let Some(environment) = source.environment_if_created()
        && environment.is_reparse_blocked()
    {
        tracing::debug!("Reparse of {} blocked, reset skipped", source.id());
        return;
    }

    let flags = source.test_and_clear_flags(
        SourceFlags::RESCHEDULE_FINISHED_TASKS | SourceFlags::CHANGE_EXPECTED,
    );

    if source.flags().contains(SourceFlags::INVALID)
        && let Err(e) = source.refresh_snapshot().await
    {
        tracing::warn!("Failed to refresh snapshot of {}: {}", source.id(), e);
    }

    processor.reset_state_impl(
        source.id(),
        flags.contains(SourceFlags::RESCHEDULE_FINISHED_TASKS),
    );
}
