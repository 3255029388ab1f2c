use log::{debug, info};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::error::{DetectError, Result};
use crate::model::{Camera, DetectionSession, OwnerId, Photo};
use crate::paths::PathAllocator;
use crate::queries::{cameras, detections, photos};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn commit_folder(
    mut tx: sqlx::Transaction<'_, sqlx::Sqlite>,
    id: i64,
    folder_path: &str,
) -> Result<()> {
    sqlx::query(&detections::set_folder_path(id, folder_path))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Result of an owner-scoped session lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLookup {
    Found(DetectionSession),
    /// The session exists but belongs to another owner
    NotFoundForOwner,
    NotFoundAtAll,
}

impl SessionLookup {
    /// Collapse both not-found cases into the same error so callers learn nothing about
    /// sessions of other owners
    pub fn into_result(self, session_id: i64) -> Result<DetectionSession> {
        match self {
            SessionLookup::Found(session) => Ok(session),
            SessionLookup::NotFoundForOwner | SessionLookup::NotFoundAtAll => {
                Err(DetectError::SessionNotFound(session_id))
            }
        }
    }
}

/// A session together with its admitted photos (photo id -> storage path)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: i64,
    pub camera_id: i64,
    pub folder_path: String,
    pub completed: bool,
    pub created_at_ms: i64,
    pub images: BTreeMap<i64, String>,
}

impl SessionSummary {
    fn new(session: DetectionSession, images: BTreeMap<i64, String>) -> Self {
        Self {
            id: session.id,
            camera_id: session.camera_id,
            folder_path: session.folder_path,
            completed: session.completed,
            created_at_ms: session.created_at_ms,
            images,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub page: u32,
    pub per_page: u32,
    pub pages: u64,
    pub total_count: u64,
    pub prev_page: Option<u32>,
    pub next_page: Option<u32>,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageMeta {
    pub fn new(page: u32, per_page: u32, total_count: u64) -> Self {
        let pages = total_count.div_ceil(per_page as u64);
        let has_prev = page > 1;
        let has_next = (page as u64) < pages;
        Self {
            page,
            per_page,
            pages,
            total_count,
            prev_page: has_prev.then(|| page - 1),
            next_page: has_next.then(|| page + 1),
            has_next,
            has_prev,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionPage {
    pub items: Vec<SessionSummary>,
    pub meta: PageMeta,
}

/// Cameras and detection sessions, scoped by owner
pub struct SessionRegistry {
    pool: SqlitePool,
    allocator: PathAllocator,
}

impl SessionRegistry {
    pub fn new(pool: SqlitePool, allocator: PathAllocator) -> Self {
        Self { pool, allocator }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn register_camera(&self, owner: &OwnerId) -> Result<Camera> {
        let id: i64 = sqlx::query_scalar(&cameras::insert(owner.as_str(), now_ms()))
            .fetch_one(&self.pool)
            .await?;
        info!("Camera {} registered for owner {}", id, owner);
        Ok(Camera {
            id,
            owner: owner.to_string(),
        })
    }

    /// Open a new session for `camera_id`
    ///
    /// The row and its folder are committed together: if the folder chain cannot be created
    /// the transaction is rolled back and no session exists.
    pub async fn create(&self, owner: &OwnerId, camera_id: i64) -> Result<DetectionSession> {
        let camera_exists: i64 = sqlx::query_scalar(&cameras::exists(camera_id))
            .fetch_one(&self.pool)
            .await?;
        if camera_exists == 0 {
            return Err(DetectError::InvalidCamera(camera_id));
        }

        let created_at_ms = now_ms();
        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(&detections::insert(
            owner.as_str(),
            camera_id,
            created_at_ms,
        ))
        .fetch_one(&mut *tx)
        .await?;

        // Dropping `tx` on error rolls the insert back
        let folder_path = self.allocator.allocate(owner, id).await?;

        // A rolled-back insert also rolls back the id sequence, so the next session gets
        // this id again and must not inherit the folder
        if let Err(e) = commit_folder(tx, id, &folder_path).await {
            self.allocator.release(&folder_path).await;
            return Err(e);
        }

        info!(
            "Detection {} opened for owner {} camera {} at {}",
            id, owner, camera_id, folder_path
        );

        Ok(DetectionSession {
            id,
            owner: owner.to_string(),
            camera_id,
            folder_path,
            completed: false,
            created_at_ms,
        })
    }

    /// Look a session up by id regardless of owner
    pub async fn find(&self, session_id: i64) -> Result<Option<DetectionSession>> {
        let row = sqlx::query(&detections::select_by_id(session_id))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(DetectionSession::from_row).transpose()
    }

    pub async fn get(&self, owner: &OwnerId, session_id: i64) -> Result<SessionLookup> {
        Ok(match self.find(session_id).await? {
            Some(session) if session.is_owned_by(owner) => SessionLookup::Found(session),
            Some(_) => {
                debug!(
                    "Detection {} requested by {} belongs to another owner",
                    session_id, owner
                );
                SessionLookup::NotFoundForOwner
            }
            None => SessionLookup::NotFoundAtAll,
        })
    }

    /// Session detail with photos, reported as not-found for foreign sessions
    pub async fn detail(&self, owner: &OwnerId, session_id: i64) -> Result<SessionSummary> {
        let session = self.get(owner, session_id).await?.into_result(session_id)?;
        let mut images = self.images_for(&[session.id]).await?;
        let images = images.remove(&session.id).unwrap_or_default();
        Ok(SessionSummary::new(session, images))
    }

    /// One page of the owner's sessions in creation order
    ///
    /// `page` is 1-based; a page past the end is empty.
    pub async fn list(&self, owner: &OwnerId, page: u32, per_page: u32) -> Result<SessionPage> {
        if page < 1 {
            return Err(DetectError::Validation("page must be at least 1".to_string()));
        }
        if per_page < 1 {
            return Err(DetectError::Validation(
                "per_page must be at least 1".to_string(),
            ));
        }

        let total: i64 = sqlx::query_scalar(&detections::count_for_owner(owner.as_str()))
            .fetch_one(&self.pool)
            .await?;

        let total = total.max(0) as u64;
        let meta = PageMeta::new(page, per_page, total);

        // SQLite rejects offsets beyond i64::MAX; anything past the total is empty anyway
        let offset = (page as u64 - 1)
            .checked_mul(per_page as u64)
            .unwrap_or(u64::MAX)
            .min(i64::MAX as u64);
        if offset >= total {
            return Ok(SessionPage {
                items: Vec::new(),
                meta,
            });
        }

        let rows = sqlx::query(&detections::select_page_for_owner(
            owner.as_str(),
            per_page as u64,
            offset,
        ))
        .fetch_all(&self.pool)
        .await?;
        let sessions = rows
            .iter()
            .map(DetectionSession::from_row)
            .collect::<Result<Vec<_>>>()?;

        let ids: Vec<i64> = sessions.iter().map(|s| s.id).collect();
        let mut images = self.images_for(&ids).await?;

        let items = sessions
            .into_iter()
            .map(|session| {
                let photos = images.remove(&session.id).unwrap_or_default();
                SessionSummary::new(session, photos)
            })
            .collect();

        Ok(SessionPage { items, meta })
    }

    pub async fn photos(&self, session_id: i64) -> Result<Vec<Photo>> {
        let rows = sqlx::query(&photos::select_for_detections(&[session_id]))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Photo::from_row).collect()
    }

    async fn images_for(&self, session_ids: &[i64]) -> Result<BTreeMap<i64, BTreeMap<i64, String>>> {
        let mut images: BTreeMap<i64, BTreeMap<i64, String>> = BTreeMap::new();
        if session_ids.is_empty() {
            return Ok(images);
        }
        let rows = sqlx::query(&photos::select_for_detections(session_ids))
            .fetch_all(&self.pool)
            .await?;
        for row in &rows {
            let photo = Photo::from_row(row)?;
            images
                .entry(photo.session_id)
                .or_default()
                .insert(photo.id, photo.storage_path);
        }
        Ok(images)
    }

    /// Flip `completed` from false to true
    ///
    /// Returns true only for the single caller that performed the transition; every later
    /// caller, including one racing on another connection, gets false.
    pub async fn mark_completed(&self, session_id: i64) -> Result<bool> {
        let result = sqlx::query(&detections::mark_completed(session_id))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
