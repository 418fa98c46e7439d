use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::source::SourceId;

/// Policy object deciding when background tasks run for a source.
///
/// Environments notify attached schedulers when the source they are bound
/// to changes identity (renamed, mime type switched, focus moved).
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &str;

    fn source_changed(&self, source: SourceId);
}

static NEXT_CONTROL_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to one scheduler attached to an environment.
///
/// Each control gets a unique id at construction; environments key their
/// attachments by it, so the same scheduler wrapped twice is attached
/// twice.
#[derive(Clone)]
pub struct SchedulerControl {
    id: u64,
    scheduler: Arc<dyn Scheduler>,
}

impl SchedulerControl {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            id: NEXT_CONTROL_ID.fetch_add(1, Ordering::Relaxed),
            scheduler,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Tells the scheduler its source changed identity.
    pub fn source_changed(&self, source: SourceId) {
        tracing::trace!("Scheduler {} notified: {} changed", self.scheduler.name(), source);
        self.scheduler.source_changed(source);
    }
}

impl std::fmt::Debug for SchedulerControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerControl")
            .field("id", &self.id)
            .field("scheduler", &self.scheduler.name())
            .finish()
    }
}
