//! # Completion Trigger Tests
//!
//! These tests verify that every detection session reaches the recognition job exactly
//! once, whether the quiescence timeout or a "last photo" signal gets there first, and
//! when both race.
//!
//! Most tests drive time through `ManualScheduler`; the last ones run on real tokio timers
//! with a short delay.
//!
//! ## Running the Tests
//!
//! ```bash
//! cargo test --test completion_trigger_test
//! ```

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use detect_intake::model::{DetectionSession, OwnerId};
use detect_intake::paths::PathAllocator;
use detect_intake::registry::SessionRegistry;
use detect_intake::scheduler::{ManualScheduler, Scheduler, TokioScheduler};
use detect_intake::trigger::{CompletionTrigger, FireCause, FireOutcome, RecognitionJob};

/// Records every session handed to recognition; optionally fails each call
#[derive(Default)]
struct RecordingJob {
    calls: Mutex<Vec<i64>>,
    fail: bool,
}

impl RecordingJob {
    fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn calls(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_for(&self, session_id: i64) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| **id == session_id)
            .count()
    }
}

#[async_trait]
impl RecognitionJob for RecordingJob {
    async fn run(&self, session: &DetectionSession) -> Result<(), String> {
        self.calls.lock().unwrap().push(session.id);
        if self.fail {
            return Err("recognizer unavailable".to_string());
        }
        Ok(())
    }
}

/// Helper to build a trigger over a fresh database
/// Returns (registry, trigger, _guard) - keep _guard alive to prevent temp file deletion
async fn create_trigger(
    scheduler: Arc<dyn Scheduler>,
    job: Arc<RecordingJob>,
    delay: Duration,
) -> (Arc<SessionRegistry>, Arc<CompletionTrigger>, tempfile::TempDir) {
    let (pool, guard) = detect_intake::db::create_test_connection_in_temporary_file()
        .await
        .unwrap();
    detect_intake::db::init_database_schema(&pool).await.unwrap();

    let registry = Arc::new(SessionRegistry::new(
        pool,
        PathAllocator::new(guard.path().join("client_files")),
    ));
    let trigger = CompletionTrigger::new(Arc::clone(&registry), scheduler, job, delay);
    (registry, trigger, guard)
}

async fn open_armed_session(registry: &SessionRegistry, trigger: &Arc<CompletionTrigger>) -> i64 {
    let owner = OwnerId::parse("u1").unwrap();
    let camera = registry.register_camera(&owner).await.unwrap();
    let session = registry.create(&owner, camera.id).await.unwrap();
    trigger.arm(session.id);
    session.id
}

async fn is_completed(registry: &SessionRegistry, session_id: i64) -> bool {
    registry.find(session_id).await.unwrap().unwrap().completed
}

/// Poll until `condition` holds or `timeout` passes
async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_arm_uses_configured_delay() {
    let scheduler = Arc::new(ManualScheduler::new());
    let job = Arc::new(RecordingJob::default());
    let (registry, trigger, _guard) =
        create_trigger(scheduler.clone(), job.clone(), Duration::from_secs(180)).await;

    let session_id = open_armed_session(&registry, &trigger).await;

    assert_eq!(trigger.delay(), Duration::from_secs(180));
    assert_eq!(scheduler.delay_for(session_id), Some(Duration::from_secs(180)));
    assert_eq!(trigger.pending(), 1);
    assert!(job.calls().is_empty(), "Nothing fires before the delay");
}

#[tokio::test]
async fn test_timeout_fires_session_with_no_photos() {
    let scheduler = Arc::new(ManualScheduler::new());
    let job = Arc::new(RecordingJob::default());
    let (registry, trigger, _guard) =
        create_trigger(scheduler.clone(), job.clone(), Duration::from_secs(180)).await;

    let session_id = open_armed_session(&registry, &trigger).await;

    assert!(scheduler.fire(session_id).await);

    assert_eq!(job.calls(), vec![session_id]);
    assert!(is_completed(&registry, session_id).await);
    assert_eq!(trigger.pending(), 0);

    // The timer is gone; nothing left to fire
    assert!(!scheduler.fire(session_id).await);
    assert_eq!(job.calls(), vec![session_id]);
}

#[tokio::test]
async fn test_last_signal_before_timeout_dispatches_once() {
    let scheduler = Arc::new(ManualScheduler::new());
    let job = Arc::new(RecordingJob::default());
    let (registry, trigger, _guard) =
        create_trigger(scheduler.clone(), job.clone(), Duration::from_secs(180)).await;

    let session_id = open_armed_session(&registry, &trigger).await;

    let outcome = trigger.signal_last(session_id).await.unwrap();
    assert_eq!(outcome, FireOutcome::Dispatched);
    assert!(
        !scheduler.is_armed(session_id),
        "Winning signal should cancel the pending timeout"
    );

    // A timeout that already escaped cancellation is a no-op
    let late = trigger.fire(session_id, FireCause::Timeout).await.unwrap();
    assert_eq!(late, FireOutcome::AlreadyCompleted);

    assert_eq!(job.calls(), vec![session_id]);
}

#[tokio::test]
async fn test_timeout_then_last_signal_is_noop() {
    let scheduler = Arc::new(ManualScheduler::new());
    let job = Arc::new(RecordingJob::default());
    let (registry, trigger, _guard) =
        create_trigger(scheduler.clone(), job.clone(), Duration::from_secs(180)).await;

    let session_id = open_armed_session(&registry, &trigger).await;

    scheduler.fire(session_id).await;
    let outcome = trigger.signal_last(session_id).await.unwrap();

    assert_eq!(outcome, FireOutcome::AlreadyCompleted);
    assert_eq!(job.calls(), vec![session_id]);
}

#[tokio::test]
async fn test_sessions_fire_independently() {
    let scheduler = Arc::new(ManualScheduler::new());
    let job = Arc::new(RecordingJob::default());
    let (registry, trigger, _guard) =
        create_trigger(scheduler.clone(), job.clone(), Duration::from_secs(180)).await;

    let first = open_armed_session(&registry, &trigger).await;
    let second = open_armed_session(&registry, &trigger).await;

    trigger.signal_last(first).await.unwrap();
    assert!(scheduler.is_armed(second), "Other sessions keep their timers");
    assert!(!is_completed(&registry, second).await);

    assert_eq!(scheduler.fire_all().await, 1);
    assert_eq!(job.calls(), vec![first, second]);
}

#[tokio::test]
async fn test_job_failure_is_not_retried() {
    let scheduler = Arc::new(ManualScheduler::new());
    let job = Arc::new(RecordingJob::failing());
    let (registry, trigger, _guard) =
        create_trigger(scheduler.clone(), job.clone(), Duration::from_secs(180)).await;

    let session_id = open_armed_session(&registry, &trigger).await;

    let outcome = trigger.signal_last(session_id).await.unwrap();
    assert_eq!(outcome, FireOutcome::Dispatched);

    // Completed stays set and nothing is re-armed
    assert!(is_completed(&registry, session_id).await);
    assert_eq!(trigger.pending(), 0);
    assert_eq!(
        trigger.fire(session_id, FireCause::Timeout).await.unwrap(),
        FireOutcome::AlreadyCompleted
    );
    assert_eq!(job.calls_for(session_id), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_timeout_and_last_signal_dispatch_exactly_once() {
    let scheduler = Arc::new(ManualScheduler::new());
    let job = Arc::new(RecordingJob::default());
    let (registry, trigger, _guard) =
        create_trigger(scheduler.clone(), job.clone(), Duration::from_secs(180)).await;

    for _ in 0..25 {
        let session_id = open_armed_session(&registry, &trigger).await;
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let timeout = {
            let scheduler = Arc::clone(&scheduler);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                scheduler.fire(session_id).await
            })
        };
        let last = {
            let trigger = Arc::clone(&trigger);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                trigger.signal_last(session_id).await
            })
        };

        timeout.await.unwrap();
        let last = last.await.unwrap().unwrap();

        assert_eq!(
            job.calls_for(session_id),
            1,
            "Session {} dispatched {} times",
            session_id,
            job.calls_for(session_id)
        );
        assert!(is_completed(&registry, session_id).await);
        if last == FireOutcome::Dispatched {
            assert!(!scheduler.is_armed(session_id));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_fires_yield_one_dispatch() {
    let scheduler = Arc::new(ManualScheduler::new());
    let job = Arc::new(RecordingJob::default());
    let (registry, trigger, _guard) =
        create_trigger(scheduler.clone(), job.clone(), Duration::from_secs(180)).await;

    let session_id = open_armed_session(&registry, &trigger).await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let trigger = Arc::clone(&trigger);
        let cause = if i % 2 == 0 {
            FireCause::Timeout
        } else {
            FireCause::LastPhoto
        };
        handles.push(tokio::spawn(async move { trigger.fire(session_id, cause).await }));
    }

    let mut dispatched = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() == FireOutcome::Dispatched {
            dispatched += 1;
        }
    }

    assert_eq!(dispatched, 1);
    assert_eq!(job.calls(), vec![session_id]);
}

#[tokio::test]
async fn test_real_timer_fires_after_quiescence() {
    let scheduler = Arc::new(TokioScheduler::new());
    let job = Arc::new(RecordingJob::default());
    let (registry, trigger, _guard) =
        create_trigger(scheduler.clone(), job.clone(), Duration::from_millis(100)).await;

    let session_id = open_armed_session(&registry, &trigger).await;
    assert_eq!(scheduler.pending(), 1);

    let fired = wait_until(Duration::from_secs(5), || job.calls_for(session_id) == 1).await;
    assert!(fired, "Timeout should hand the session to recognition");
    assert_eq!(scheduler.pending(), 0);

    // Well past another delay: still exactly once
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(job.calls(), vec![session_id]);
    assert!(is_completed(&registry, session_id).await);
}

#[tokio::test]
async fn test_real_timer_cancelled_by_last_signal() {
    let scheduler = Arc::new(TokioScheduler::new());
    let job = Arc::new(RecordingJob::default());
    let (registry, trigger, _guard) =
        create_trigger(scheduler.clone(), job.clone(), Duration::from_millis(200)).await;

    let session_id = open_armed_session(&registry, &trigger).await;

    let outcome = trigger.signal_last(session_id).await.unwrap();
    assert_eq!(outcome, FireOutcome::Dispatched);
    assert_eq!(scheduler.pending(), 0);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(job.calls(), vec![session_id]);
}
