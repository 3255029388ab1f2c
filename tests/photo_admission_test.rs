//! # Photo Admission Tests
//!
//! These tests verify how uploaded photos are validated, written into the session folder
//! and recorded, including duplicate names under concurrency.
//!
//! ## Running the Tests
//!
//! ```bash
//! cargo test --test photo_admission_test
//! ```

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use detect_intake::admit::PhotoAdmitter;
use detect_intake::error::{DetectError, ErrorKind};
use detect_intake::model::{DetectionSession, OwnerId};
use detect_intake::paths::PathAllocator;
use detect_intake::registry::SessionRegistry;
use detect_intake::scheduler::ManualScheduler;
use detect_intake::trigger::{CompletionTrigger, FireOutcome, RecognitionJob};

#[derive(Default)]
struct RecordingJob {
    calls: Mutex<Vec<i64>>,
}

impl RecordingJob {
    fn calls(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecognitionJob for RecordingJob {
    async fn run(&self, session: &DetectionSession) -> Result<(), String> {
        self.calls.lock().unwrap().push(session.id);
        Ok(())
    }
}

struct Harness {
    registry: Arc<SessionRegistry>,
    trigger: Arc<CompletionTrigger>,
    admitter: Arc<PhotoAdmitter>,
    scheduler: Arc<ManualScheduler>,
    job: Arc<RecordingJob>,
    _guard: tempfile::TempDir,
}

async fn create_harness() -> Harness {
    let (pool, guard) = detect_intake::db::create_test_connection_in_temporary_file()
        .await
        .unwrap();
    detect_intake::db::init_database_schema(&pool).await.unwrap();

    let allocator = PathAllocator::new(guard.path().join("client_files"));
    let registry = Arc::new(SessionRegistry::new(pool, allocator));
    let scheduler = Arc::new(ManualScheduler::new());
    let job = Arc::new(RecordingJob::default());
    let trigger = CompletionTrigger::new(
        Arc::clone(&registry),
        scheduler.clone(),
        job.clone(),
        Duration::from_secs(180),
    );
    let admitter = Arc::new(PhotoAdmitter::new(
        Arc::clone(&registry),
        Arc::clone(&trigger),
    ));

    Harness {
        registry,
        trigger,
        admitter,
        scheduler,
        job,
        _guard: guard,
    }
}

/// Open an armed session for owner "u1"
async fn open_session(h: &Harness) -> DetectionSession {
    let owner = OwnerId::parse("u1").unwrap();
    let camera = h.registry.register_camera(&owner).await.unwrap();
    let session = h.registry.create(&owner, camera.id).await.unwrap();
    h.trigger.arm(session.id);
    session
}

async fn count_photos(h: &Harness, session_id: i64) -> usize {
    h.registry.photos(session_id).await.unwrap().len()
}

#[tokio::test]
async fn test_admit_writes_file_and_records_photo() {
    let h = create_harness().await;
    let session = open_session(&h).await;

    let admission = h
        .admitter
        .admit(session.id, "a.jpg", b"jpeg bytes", false)
        .await
        .unwrap();

    let expected = Path::new(&session.folder_path).join("a.jpg");
    assert_eq!(Path::new(&admission.photo.storage_path), expected);
    assert_eq!(admission.photo.session_id, session.id);
    assert_eq!(admission.trigger, None);
    assert_eq!(std::fs::read(&expected).unwrap(), b"jpeg bytes");

    let photos = h.registry.photos(session.id).await.unwrap();
    assert_eq!(photos, vec![admission.photo]);

    // Not last: the session stays armed
    assert!(h.scheduler.is_armed(session.id));
    assert!(h.job.calls().is_empty());
}

#[tokio::test]
async fn test_duplicate_name_is_conflict_and_keeps_first_file() {
    let h = create_harness().await;
    let session = open_session(&h).await;

    h.admitter
        .admit(session.id, "a.jpg", b"first", false)
        .await
        .unwrap();
    let err = h
        .admitter
        .admit(session.id, "a.jpg", b"second", false)
        .await
        .unwrap_err();

    assert!(matches!(err, DetectError::DuplicatePath(_)));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(count_photos(&h, session.id).await, 1);

    let stored = Path::new(&session.folder_path).join("a.jpg");
    assert_eq!(
        std::fs::read(stored).unwrap(),
        b"first",
        "Rejected duplicate must not overwrite the admitted file"
    );
}

#[tokio::test]
async fn test_unrecorded_file_on_disk_is_never_overwritten() {
    let h = create_harness().await;
    let session = open_session(&h).await;

    // Another writer got the file onto disk but has not recorded it yet
    let stored = Path::new(&session.folder_path).join("a.jpg");
    std::fs::write(&stored, b"other writer").unwrap();

    let err = h
        .admitter
        .admit(session.id, "a.jpg", b"mine", false)
        .await
        .unwrap_err();

    assert!(matches!(err, DetectError::DuplicatePath(_)), "got {:?}", err);
    assert_eq!(std::fs::read(&stored).unwrap(), b"other writer");
    assert_eq!(count_photos(&h, session.id).await, 0);
}

#[tokio::test]
async fn test_names_that_sanitize_alike_collide() {
    let h = create_harness().await;
    let session = open_session(&h).await;

    h.admitter
        .admit(session.id, "my photo.jpg", b"one", false)
        .await
        .unwrap();
    let err = h
        .admitter
        .admit(session.id, "my_photo.jpg", b"two", false)
        .await
        .unwrap_err();

    assert!(matches!(err, DetectError::DuplicatePath(_)));
}

#[tokio::test]
async fn test_disallowed_extension_is_rejected_without_side_effects() {
    let h = create_harness().await;
    let session = open_session(&h).await;

    for name in ["notes.txt", "archive.tar.gz", "no_extension", "jpg"] {
        let err = h
            .admitter
            .admit(session.id, name, b"data", false)
            .await
            .unwrap_err();
        assert!(
            matches!(err, DetectError::InvalidExtension(_)),
            "{} should be rejected, got {:?}",
            name,
            err
        );
    }

    assert_eq!(count_photos(&h, session.id).await, 0);
    let entries = std::fs::read_dir(&session.folder_path).unwrap().count();
    assert_eq!(entries, 0, "Nothing should be written for rejected uploads");
}

#[tokio::test]
async fn test_extension_check_is_case_insensitive() {
    let h = create_harness().await;
    let session = open_session(&h).await;

    for name in ["UPPER.JPG", "mixed.Png", "photo.jpeg"] {
        h.admitter
            .admit(session.id, name, b"data", false)
            .await
            .unwrap_or_else(|e| panic!("{} should be admitted: {}", name, e));
    }

    assert_eq!(count_photos(&h, session.id).await, 3);
}

#[tokio::test]
async fn test_traversal_name_stays_inside_session_folder() {
    let h = create_harness().await;
    let session = open_session(&h).await;

    let admission = h
        .admitter
        .admit(session.id, "../../escape.png", b"data", false)
        .await
        .unwrap();

    let stored = Path::new(&admission.photo.storage_path);
    assert_eq!(stored.parent().unwrap(), Path::new(&session.folder_path));
    assert_eq!(stored.file_name().unwrap(), "escape.png");
    assert!(stored.is_file());
}

#[tokio::test]
async fn test_empty_payload_is_validation_error() {
    let h = create_harness().await;
    let session = open_session(&h).await;

    let err = h
        .admitter
        .admit(session.id, "a.jpg", b"", false)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(count_photos(&h, session.id).await, 0);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let h = create_harness().await;

    let err = h
        .admitter
        .admit(4242, "a.jpg", b"data", false)
        .await
        .unwrap_err();

    assert!(matches!(err, DetectError::SessionNotFound(4242)));
}

#[tokio::test]
async fn test_write_failure_leaves_no_record() {
    let h = create_harness().await;
    let session = open_session(&h).await;

    std::fs::remove_dir(&session.folder_path).unwrap();

    let err = h
        .admitter
        .admit(session.id, "a.jpg", b"data", false)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    assert_eq!(count_photos(&h, session.id).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_name_uploads_admit_exactly_one() {
    let h = create_harness().await;
    let session = open_session(&h).await;

    let mut handles = Vec::new();
    for i in 0..8u8 {
        let admitter = Arc::clone(&h.admitter);
        let session_id = session.id;
        handles.push(tokio::spawn(async move {
            let bytes = vec![i + 1];
            admitter.admit(session_id, "same.jpg", &bytes, false).await
        }));
    }

    let mut admitted = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(DetectError::DuplicatePath(_)) => conflicts += 1,
            Err(e) => panic!("Unexpected error: {}", e),
        }
    }

    assert_eq!(admitted, 1, "Exactly one concurrent upload should win");
    assert_eq!(conflicts, 7);
    assert_eq!(count_photos(&h, session.id).await, 1);
}

#[tokio::test]
async fn test_last_photo_fires_trigger_once() {
    let h = create_harness().await;
    let session = open_session(&h).await;

    let first = h
        .admitter
        .admit(session.id, "a.jpg", b"data", true)
        .await
        .unwrap();
    assert_eq!(first.trigger, Some(FireOutcome::Dispatched));
    assert!(!h.scheduler.is_armed(session.id), "Timer should be cancelled");

    // A second "last" photo is still admitted but does not dispatch again
    let second = h
        .admitter
        .admit(session.id, "b.jpg", b"data", true)
        .await
        .unwrap();
    assert_eq!(second.trigger, Some(FireOutcome::AlreadyCompleted));

    assert_eq!(h.job.calls(), vec![session.id]);
    assert_eq!(count_photos(&h, session.id).await, 2);
}
