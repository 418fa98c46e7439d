//! Debounced reset behavior of `SourceControl`.
//!
//! All tests run on a paused clock, so reset instants are exact.

mod common;

use common::{
    CountingParserFactory, settle, test_source, test_state, with_test_environment,
};
use parking_lot::Mutex;
use reparse_control::FileEvent;
use reparse_core::{Scheduler, SchedulerControl, SourceFlags, SourceId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const MS: Duration = Duration::from_millis(1);

#[tokio::test(start_paused = true)]
async fn test_revalidate_replaces_pending_reset() {
    let (state, _) = test_state();
    let source = test_source(&state, "/p/A.java");

    source.control().revalidate(400 * MS);
    tokio::time::sleep(50 * MS).await;
    source.control().revalidate(100 * MS);
    let second = Instant::now();

    settle(Duration::from_secs(2)).await;

    with_test_environment(&source, |env| {
        assert_eq!(env.reset_instants(), vec![second + 100 * MS]);
    });
    assert!(!source.control().has_pending_reset());
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_edits_coalesces_into_one_reset() {
    let (state, _) = test_state();
    let source = test_source(&state, "/p/A.java");

    let edits = (0..50).map(|i| {
        let control = Arc::clone(source.control());
        async move {
            control.region_changed(i, i + 1);
            tokio::task::yield_now().await;
        }
    });
    futures::future::join_all(edits).await;
    let last = Instant::now();

    settle(Duration::from_secs(2)).await;

    with_test_environment(&source, |env| {
        assert_eq!(env.reset_instants(), vec![last + state.delays.reparse_delay(false)]);
    });
}

#[tokio::test(start_paused = true)]
async fn test_source_changed_uses_immediate_delay() {
    let (state, _) = test_state();
    let source = test_source(&state, "/p/A.java");

    source.control().source_changed(false);
    let changed = Instant::now();
    assert_eq!(
        source.flags(),
        SourceFlags::INVALID | SourceFlags::RESCHEDULE_FINISHED_TASKS
    );

    settle(Duration::from_secs(1)).await;

    with_test_environment(&source, |env| {
        assert_eq!(env.reset_instants(), vec![changed + 10 * MS]);
    });
    assert!(source.flags().is_empty());
    assert!(source.snapshot().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_mime_change_re_resolves_parser() {
    let (state, _) = test_state();
    let factory = Arc::new(CountingParserFactory::default());
    state.register_parser(factory.clone());
    let source = test_source(&state, "/p/A.java");

    assert!(source.parser().is_some());
    assert!(source.parser().is_some());
    assert_eq!(factory.created(), 1);

    source.control().source_changed(false);
    assert!(source.parser().is_some());
    assert_eq!(factory.created(), 1);

    source.control().source_changed(true);
    assert!(source.parser().is_some());
    assert_eq!(factory.created(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_parser_registration_invalidates_listening_sources() {
    let (state, _) = test_state();
    let source = test_source(&state, "/p/A.java");
    let other = test_source(&state, "/p/a.py");
    assert!(source.parser().is_none());

    let factory = Arc::new(CountingParserFactory::default());
    state.register_parser(factory.clone());

    assert!(source.is_invalid());
    assert!(!other.is_invalid());
    assert!(source.parser().is_some());
    assert_eq!(factory.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_blocked_reset_leaves_flags_until_revalidated() {
    let (state, _) = test_state();
    let source = test_source(&state, "/p/A.java");
    with_test_environment(&source, |env| env.set_blocked(true));

    source.control().source_changed(false);
    settle(Duration::from_secs(1)).await;

    assert!(source.is_invalid());
    assert!(source.flags().contains(SourceFlags::RESCHEDULE_FINISHED_TASKS));
    with_test_environment(&source, |env| {
        assert_eq!(env.reset_count(), 1);
        env.set_blocked(false);
    });

    // No automatic retry once unblocked.
    settle(Duration::from_secs(5)).await;
    assert!(source.is_invalid());

    source.control().revalidate(Duration::ZERO);
    settle(MS).await;

    assert!(!source.is_invalid());
    assert!(source.flags().is_empty());
    with_test_environment(&source, |env| assert_eq!(env.reset_count(), 2));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_region_behaves_like_source_changed() {
    let (state, _) = test_state();
    let region = test_source(&state, "/p/A.java");
    let whole = test_source(&state, "/p/B.java");

    for source in [&region, &whole] {
        source.control().region_changed(2, 5);
        assert!(source.modification_region().is_some());
    }

    region.control().region_changed(-1, -1);
    whole.control().source_changed(false);
    let changed = Instant::now();

    assert_eq!(region.flags(), whole.flags());
    assert_eq!(region.modification_region(), None);
    assert_eq!(whole.modification_region(), None);

    settle(Duration::from_secs(1)).await;

    let instants: Vec<Vec<Instant>> = [&region, &whole]
        .iter()
        .map(|s| with_test_environment(s, |env| env.reset_instants()))
        .collect();
    assert_eq!(instants[0], vec![changed + 10 * MS]);
    assert_eq!(instants[0], instants[1]);
    assert_eq!(region.flags(), whole.flags());
}

#[tokio::test(start_paused = true)]
async fn test_region_changed_uses_standard_delay() {
    let (state, _) = test_state();
    let source = test_source(&state, "/p/A.java");

    source.control().region_changed(7, 3);
    let changed = Instant::now();
    let region = source.modification_region().unwrap();
    assert_eq!((region.start, region.end), (3, 7));

    settle(Duration::from_secs(1)).await;

    with_test_environment(&source, |env| {
        assert_eq!(env.reset_instants(), vec![changed + 500 * MS]);
    });
}

#[tokio::test(start_paused = true)]
async fn test_state_changed_keeps_results_valid() {
    let (state, _) = test_state();
    let source = test_source(&state, "/p/A.java");

    source.control().state_changed();
    assert_eq!(source.flags(), SourceFlags::RESCHEDULE_FINISHED_TASKS);

    settle(Duration::from_secs(1)).await;

    assert!(source.flags().is_empty());
    // Nothing was invalid, so nothing was read.
    assert!(source.snapshot().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_expect_change_cleared_by_reset() {
    let (state, _) = test_state();
    let source = test_source(&state, "/p/A.java");

    source.control().expect_change();
    assert_eq!(source.flags(), SourceFlags::CHANGE_EXPECTED);

    source.control().revalidate(5 * MS);
    settle(10 * MS).await;
    assert!(source.flags().is_empty());
}

#[derive(Default)]
struct CountingScheduler(Mutex<Vec<SourceId>>);

impl Scheduler for CountingScheduler {
    fn name(&self) -> &str {
        "counting"
    }

    fn source_changed(&self, source: SourceId) {
        self.0.lock().push(source);
    }
}

#[tokio::test(start_paused = true)]
async fn test_detached_scheduler_receives_nothing() {
    let (state, _) = test_state();
    let source = test_source(&state, "/p/A.java");
    let scheduler = Arc::new(CountingScheduler::default());
    let control = SchedulerControl::new(scheduler.clone());

    source.environment().attach_scheduler(control.clone(), true);
    state.file_event(&FileEvent::renamed("/p/A.java", "/p/B.java"));
    assert_eq!(*scheduler.0.lock(), vec![source.id()]);

    source.environment().attach_scheduler(control, false);
    state.file_event(&FileEvent::renamed("/p/B.java", "/p/C.java"));

    assert_eq!(scheduler.0.lock().len(), 1);
    assert_eq!(source.path(), PathBuf::from("/p/C.java"));
    assert!(Arc::ptr_eq(
        &state.source(Path::new("/p/C.java")).unwrap(),
        &source
    ));
}

#[tokio::test(start_paused = true)]
async fn test_set_reparse_delays() {
    let (state, _) = test_state();
    let source = test_source(&state, "/p/A.java");

    assert!(state.delays.set_reparse_delays(100 * MS, 200 * MS).is_err());
    assert_eq!(state.delays.reparse_delay(false), 500 * MS);
    assert_eq!(state.delays.reparse_delay(true), 10 * MS);

    state.delays.set_reparse_delays(40 * MS, 40 * MS).unwrap();
    state.delays.set_reparse_delays(200 * MS, 20 * MS).unwrap();
    assert_eq!(state.delays.reparse_delay(false), 200 * MS);
    assert_eq!(state.delays.reparse_delay(true), 20 * MS);

    source.control().source_changed(false);
    let first = Instant::now();
    settle(Duration::from_secs(1)).await;
    source.control().region_changed(0, 1);
    let second = Instant::now();
    settle(Duration::from_secs(1)).await;

    with_test_environment(&source, |env| {
        assert_eq!(
            env.reset_instants(),
            vec![first + 20 * MS, second + 200 * MS]
        );
    });
}

#[tokio::test(start_paused = true)]
async fn test_dispose_cancels_pending_reset() {
    let (state, _) = test_state();
    let source = test_source(&state, "/p/A.java");

    source.control().source_changed(false);
    assert!(source.control().has_pending_reset());
    state.sources.dispose(source.id());

    settle(Duration::from_secs(1)).await;

    with_test_environment(&source, |env| assert_eq!(env.reset_count(), 0));
    assert!(source.is_invalid());
}
