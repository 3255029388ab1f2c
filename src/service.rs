//! Request-level operations
//!
//! Requests arrive as typed structs and are validated field by field here, before any
//! registry, admitter or trigger logic runs.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::admit::PhotoAdmitter;
use crate::config::ServiceConfig;
use crate::error::{DetectError, Result};
use crate::model::OwnerId;
use crate::paths::PathAllocator;
use crate::registry::{PageMeta, SessionRegistry, SessionSummary};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::trigger::{job_from_config, CompletionTrigger, FireOutcome, RecognitionJob};

type DynError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportDetectionRequest {
    pub camera_id: Option<i64>,
}

impl ReportDetectionRequest {
    fn validate(&self) -> Result<i64> {
        self.camera_id
            .ok_or_else(|| DetectError::Validation("No camera id given".to_string()))
    }
}

/// One uploaded photo as received from the transport
#[derive(Debug, Clone, Default)]
pub struct PhotoUpload {
    pub detection_id: Option<i64>,
    pub filename: Option<String>,
    pub bytes: Bytes,
    pub last: bool,
}

struct ValidPhotoUpload<'a> {
    detection_id: i64,
    filename: &'a str,
}

impl PhotoUpload {
    fn validate(&self) -> Result<ValidPhotoUpload<'_>> {
        let detection_id = self
            .detection_id
            .ok_or_else(|| DetectError::Validation("No detection id given".to_string()))?;
        let filename = match self.filename.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => return Err(DetectError::Validation("No file uploaded".to_string())),
        };
        if self.bytes.is_empty() {
            return Err(DetectError::Validation("No file uploaded".to_string()));
        }
        Ok(ValidPhotoUpload {
            detection_id,
            filename,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraRegistered {
    pub camera_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionReported {
    pub detection_id: i64,
    pub folder_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoUploaded {
    pub photo_id: i64,
    /// True when this upload was the one that handed the session to recognition
    pub recognition_started: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionListing {
    pub data: Vec<SessionSummary>,
    pub meta: PageMeta,
}

/// Wires the registry, the admitter and the trigger together
pub struct DetectionService {
    registry: Arc<SessionRegistry>,
    admitter: PhotoAdmitter,
    trigger: Arc<CompletionTrigger>,
    default_per_page: u32,
}

impl DetectionService {
    pub fn new(
        pool: SqlitePool,
        allocator: PathAllocator,
        scheduler: Arc<dyn Scheduler>,
        job: Arc<dyn RecognitionJob>,
        quiescence_delay: Duration,
        default_per_page: u32,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(pool, allocator));
        let trigger = CompletionTrigger::new(
            Arc::clone(&registry),
            scheduler,
            job,
            quiescence_delay,
        );
        let admitter = PhotoAdmitter::new(Arc::clone(&registry), Arc::clone(&trigger));
        Self {
            registry,
            admitter,
            trigger,
            default_per_page,
        }
    }

    /// Open the configured database and build a service running on real timers
    pub async fn from_config(config: &ServiceConfig) -> std::result::Result<Self, DynError> {
        let pool = crate::db::open_and_init(&config.database).await?;
        let job = job_from_config(config.recognition.as_ref())?;
        Ok(Self::new(
            pool,
            PathAllocator::new(&config.files_dir),
            Arc::new(TokioScheduler::new()),
            job,
            config.quiescence_delay(),
            config.default_per_page,
        ))
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn trigger(&self) -> &Arc<CompletionTrigger> {
        &self.trigger
    }

    pub async fn register_camera(&self, owner: &OwnerId) -> Result<CameraRegistered> {
        let camera = self.registry.register_camera(owner).await?;
        Ok(CameraRegistered {
            camera_id: camera.id,
        })
    }

    /// Open a session and start its quiescence countdown
    pub async fn report_detection(
        &self,
        owner: &OwnerId,
        request: &ReportDetectionRequest,
    ) -> Result<DetectionReported> {
        let camera_id = request.validate()?;
        let session = self.registry.create(owner, camera_id).await?;
        self.trigger.arm(session.id);
        Ok(DetectionReported {
            detection_id: session.id,
            folder_path: session.folder_path,
        })
    }

    pub async fn upload_photo(&self, owner: &OwnerId, upload: &PhotoUpload) -> Result<PhotoUploaded> {
        let valid = upload.validate()?;
        self.registry
            .get(owner, valid.detection_id)
            .await?
            .into_result(valid.detection_id)?;

        let admission = self
            .admitter
            .admit(valid.detection_id, valid.filename, &upload.bytes, upload.last)
            .await?;

        Ok(PhotoUploaded {
            photo_id: admission.photo.id,
            recognition_started: admission.trigger == Some(FireOutcome::Dispatched),
        })
    }

    pub async fn list_detections(&self, owner: &OwnerId, query: PageQuery) -> Result<DetectionListing> {
        let page = query.page.unwrap_or(1);
        let per_page = query.per_page.unwrap_or(self.default_per_page);
        let page = self.registry.list(owner, page, per_page).await?;
        Ok(DetectionListing {
            data: page.items,
            meta: page.meta,
        })
    }

    pub async fn get_detection(&self, owner: &OwnerId, detection_id: i64) -> Result<SessionSummary> {
        self.registry.detail(owner, detection_id).await
    }
}
