use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt;

use crate::error::{DetectError, Result};

/// Verified identifier of the user owning cameras and sessions
///
/// The identifier doubles as a folder name, so only ASCII letters and digits are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DetectError::Validation("No owner id given".to_string()));
        }
        if !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DetectError::Validation(
                "Invalid owner id. Only letters and digits are allowed".to_string(),
            ));
        }
        Ok(OwnerId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Camera {
    pub id: i64,
    pub owner: String,
}

/// One detection-reporting episode for one camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionSession {
    pub id: i64,
    pub owner: String,
    pub camera_id: i64,
    pub folder_path: String,
    pub completed: bool,
    pub created_at_ms: i64,
}

impl DetectionSession {
    /// Map a row selected with the detections column list
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let completed: i64 = row.try_get(4)?;
        let folder_path: Option<String> = row.try_get(3)?;
        Ok(DetectionSession {
            id: row.try_get(0)?,
            owner: row.try_get(1)?,
            camera_id: row.try_get(2)?,
            folder_path: folder_path.unwrap_or_default(),
            completed: completed != 0,
            created_at_ms: row.try_get(5)?,
        })
    }

    pub fn is_owned_by(&self, owner: &OwnerId) -> bool {
        self.owner == owner.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Photo {
    pub id: i64,
    pub session_id: i64,
    pub storage_path: String,
    pub created_at_ms: i64,
}

impl Photo {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Photo {
            id: row.try_get(0)?,
            session_id: row.try_get(1)?,
            storage_path: row.try_get(2)?,
            created_at_ms: row.try_get(3)?,
        })
    }
}
