//! Storage layout: `<root>/<owner>/<session-id>/<sanitized-filename>`
//!
//! Recognition reads the same folders, so the layout is part of the external contract.

use log::warn;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::constants::ALLOWED_EXTENSIONS;
use crate::error::{DetectError, Result};
use crate::model::OwnerId;

/// Derives and creates the folder chain for a session
#[derive(Debug, Clone)]
pub struct PathAllocator {
    root: PathBuf,
}

impl PathAllocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create `<root>/<owner>/<session_id>` and return it
    ///
    /// Every prefix is created in turn and "already exists" counts as success, so a retried
    /// call or two sessions of the same owner racing on the owner folder both succeed. The
    /// path is only returned once all three levels exist.
    pub async fn allocate(&self, owner: &OwnerId, session_id: i64) -> Result<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| DetectError::storage(format!("creating '{}'", self.root.display()), e))?;

        let owner_dir = self.root.join(owner.as_str());
        ensure_dir(&owner_dir).await?;

        let session_dir = owner_dir.join(session_id.to_string());
        ensure_dir(&session_dir).await?;

        Ok(session_dir.to_string_lossy().into_owned())
    }

    /// Remove a session folder handed out by `allocate` whose session was never committed
    ///
    /// Only an empty folder is removed; the owner folder is left alone.
    pub async fn release(&self, session_dir: &str) {
        if let Err(e) = tokio::fs::remove_dir(session_dir).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove unused session folder '{}': {}", session_dir, e);
            }
        }
    }
}

async fn ensure_dir(path: &Path) -> Result<()> {
    match tokio::fs::create_dir(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let meta = tokio::fs::metadata(path)
                .await
                .map_err(|e| DetectError::storage(format!("checking '{}'", path.display()), e))?;
            if meta.is_dir() {
                Ok(())
            } else {
                Err(DetectError::StorageUnavailable(format!(
                    "'{}' exists but is not a directory",
                    path.display()
                )))
            }
        }
        Err(e) => Err(DetectError::storage(format!("creating '{}'", path.display()), e)),
    }
}

/// True when the name has an extension from the allowed set (case-insensitive)
pub fn allowed_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

/// Reduce a client-supplied filename to a safe single path component
///
/// Non-ASCII characters are dropped, path separators become spaces, whitespace runs become
/// `_`, anything outside `[A-Za-z0-9_.-]` is removed, and leading/trailing `.` and `_` are
/// stripped. The result may be empty.
pub fn sanitize_filename(filename: &str) -> String {
    let spaced: String = filename
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

    joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect::<String>()
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}
