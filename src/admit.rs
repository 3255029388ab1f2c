use dashmap::DashSet;
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use crate::error::{DetectError, Result};
use crate::model::Photo;
use crate::paths::{allowed_file, sanitize_filename};
use crate::queries::photos;
use crate::registry::SessionRegistry;
use crate::trigger::{CompletionTrigger, FireOutcome};

/// Outcome of a successful admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub photo: Photo,
    /// Result of the early-fire signal when the photo was flagged as last. `None` when no
    /// signal was sent or the signal itself failed.
    pub trigger: Option<FireOutcome>,
}

/// Claim on a storage path, released when dropped
struct PathReservation<'a> {
    reserved: &'a DashSet<String>,
    path: String,
}

impl Drop for PathReservation<'_> {
    fn drop(&mut self) {
        self.reserved.remove(&self.path);
    }
}

/// Create `path` and write `bytes` into it; an existing file is never touched
async fn write_new_file(path: &str, bytes: &[u8]) -> Result<()> {
    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(DetectError::DuplicatePath(path.to_string()));
        }
        Err(e) => return Err(DetectError::storage(format!("creating '{}'", path), e)),
    };

    let written = async {
        file.write_all(bytes).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = written {
        drop(file);
        if let Err(remove_err) = tokio::fs::remove_file(path).await {
            warn!("Failed to remove partial photo '{}': {}", path, remove_err);
        }
        return Err(DetectError::storage(format!("writing '{}'", path), e));
    }
    Ok(())
}

/// Validates, stores and records photos for a session
pub struct PhotoAdmitter {
    registry: Arc<SessionRegistry>,
    trigger: Arc<CompletionTrigger>,
    in_flight: DashSet<String>,
}

impl PhotoAdmitter {
    pub fn new(registry: Arc<SessionRegistry>, trigger: Arc<CompletionTrigger>) -> Self {
        Self {
            registry,
            trigger,
            in_flight: DashSet::new(),
        }
    }

    pub async fn admit(
        &self,
        session_id: i64,
        filename: &str,
        bytes: &[u8],
        is_last: bool,
    ) -> Result<Admission> {
        let session = self
            .registry
            .find(session_id)
            .await?
            .ok_or(DetectError::SessionNotFound(session_id))?;

        if !allowed_file(filename) {
            return Err(DetectError::InvalidExtension(filename.to_string()));
        }
        if bytes.is_empty() {
            return Err(DetectError::Validation("No file uploaded".to_string()));
        }

        let sanitized = sanitize_filename(filename);
        if sanitized.is_empty() {
            return Err(DetectError::Validation(format!(
                "Filename '{}' has no usable characters",
                filename
            )));
        }
        if !allowed_file(&sanitized) {
            return Err(DetectError::InvalidExtension(sanitized));
        }

        let storage_path = Path::new(&session.folder_path)
            .join(&sanitized)
            .to_string_lossy()
            .into_owned();

        if session.completed {
            warn!(
                "Photo {} arrived for detection {} after recognition was started",
                storage_path, session_id
            );
        }

        let photo = {
            let _reservation = self.reserve(&storage_path)?;

            let exists: i64 = sqlx::query_scalar(&photos::exists_by_path(&storage_path))
                .fetch_one(self.registry.pool())
                .await?;
            if exists != 0 {
                return Err(DetectError::DuplicatePath(storage_path));
            }

            // File first, record second: a record never points at a missing file
            write_new_file(&storage_path, bytes).await?;

            self.record(session_id, &storage_path).await?
        };

        info!(
            "Photo {} admitted into detection {} at {}",
            photo.id, session_id, photo.storage_path
        );

        let trigger = if is_last {
            match self.trigger.signal_last(session_id).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    error!(
                        "Last-photo signal for detection {} failed: {}",
                        session_id, e
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(Admission { photo, trigger })
    }

    /// Check-and-claim `path` as one step across concurrent uploads
    fn reserve(&self, path: &str) -> Result<PathReservation<'_>> {
        if !self.in_flight.insert(path.to_string()) {
            return Err(DetectError::DuplicatePath(path.to_string()));
        }
        Ok(PathReservation {
            reserved: &self.in_flight,
            path: path.to_string(),
        })
    }

    async fn record(&self, session_id: i64, storage_path: &str) -> Result<Photo> {
        let created_at_ms = chrono::Utc::now().timestamp_millis();
        let inserted = sqlx::query_scalar::<_, i64>(&photos::insert(
            session_id,
            storage_path,
            created_at_ms,
        ))
        .fetch_one(self.registry.pool())
        .await;

        let err = match inserted {
            Ok(id) => {
                return Ok(Photo {
                    id,
                    session_id,
                    storage_path: storage_path.to_string(),
                    created_at_ms,
                })
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                DetectError::DuplicatePath(storage_path.to_string())
            }
            Err(e) => e.into(),
        };

        // The file was created by this call, so it is ours to remove
        if let Err(remove_err) = tokio::fs::remove_file(storage_path).await {
            warn!(
                "Failed to remove unrecorded photo '{}': {}",
                storage_path, remove_err
            );
        }
        Err(err)
    }
}
