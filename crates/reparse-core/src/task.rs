use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::parser::ParseResult;

/// What happens to a task after it finished running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReschedulePolicy {
    /// Kept and run again after the next change to its source.
    #[default]
    OnChange,
    /// Dropped after the first run.
    Once,
}

/// Why a running task was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The source was modified while the task ran.
    SourceModification,
    /// A task with a higher priority was scheduled.
    HigherPriorityTask,
    /// Scheduler tasks for the source were suspended.
    Suspended,
    /// The task was removed or rescheduled explicitly.
    Removed,
    /// A user task took the parser lock.
    UserTask,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::SourceModification => "source modification",
            Self::HigherPriorityTask => "higher priority task",
            Self::Suspended => "suspended",
            Self::Removed => "removed",
            Self::UserTask => "user task",
        };
        f.write_str(text)
    }
}

/// Background analysis run against a source's current parse result.
///
/// Tasks are identified by pointer: adding the same `Arc` twice to one
/// source schedules it once per add, removing it removes every copy.
///
/// `run` may be aborted at any await point when the task is cancelled;
/// `cancel` is invoked first so synchronous work can poll a flag.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use reparse_core::parser::ParseResult;
/// use reparse_core::task::SchedulerTask;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct CountRuns(AtomicUsize);
///
/// #[async_trait]
/// impl SchedulerTask for CountRuns {
///     fn name(&self) -> &str {
///         "count-runs"
///     }
///
///     async fn run(&self, _result: Arc<dyn ParseResult>) {
///         self.0.fetch_add(1, Ordering::SeqCst);
///     }
/// }
/// ```
#[async_trait]
pub trait SchedulerTask: Send + Sync {
    fn name(&self) -> &str;

    /// Lower values run first.
    fn priority(&self) -> i32 {
        100
    }

    fn reschedule_policy(&self) -> ReschedulePolicy {
        ReschedulePolicy::OnChange
    }

    async fn run(&self, result: Arc<dyn ParseResult>);

    /// Called before the running future is aborted.
    fn cancel(&self, reason: CancelReason) {
        let _ = reason;
    }
}

/// Identity comparison for task handles.
pub fn same_task(a: &Arc<dyn SchedulerTask>, b: &Arc<dyn SchedulerTask>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
