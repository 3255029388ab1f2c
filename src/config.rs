use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{DEFAULT_FILES_DIR, DEFAULT_PER_PAGE, DEFAULT_QUIESCENCE_SECS};

fn default_files_dir() -> PathBuf {
    PathBuf::from(DEFAULT_FILES_DIR)
}

fn default_api_port() -> u16 {
    3000
}

fn default_quiescence_secs() -> u64 {
    DEFAULT_QUIESCENCE_SECS
}

fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

/// Service configuration file structure
///
/// Format:
/// ```toml
/// files_dir = "client_files"
/// database = "detect.sqlite"
/// api_port = 3000
/// quiescence_secs = 180
///
/// [recognition]
/// command = ["python3", "recognize.py"]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Root folder for owner/session photo folders (default: client_files)
    #[serde(default = "default_files_dir")]
    pub files_dir: PathBuf,
    /// SQLite database file holding cameras, sessions and photos (required)
    pub database: PathBuf,
    /// API server port (default: 3000)
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Seconds to wait after session creation before recognition runs without a "last" photo
    #[serde(default = "default_quiescence_secs")]
    pub quiescence_secs: u64,
    /// Page size for session listings when the request gives none (default: 5)
    #[serde(default = "default_per_page")]
    pub default_per_page: u32,
    /// Downstream recognition job (maps to [recognition] section in TOML)
    pub recognition: Option<RecognitionConfig>,
}

/// Recognition job configuration (maps to [recognition] section in TOML)
#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionConfig {
    /// Program and leading arguments; the session id and folder path are appended
    pub command: Vec<String>,
}

impl ServiceConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: ServiceConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;
        config
            .validate()
            .map_err(|e| format!("Invalid config file '{}': {}", path.display(), e))?;
        Ok(config)
    }

    /// Validate values that serde cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.quiescence_secs == 0 {
            return Err("quiescence_secs must be greater than 0".to_string());
        }

        if self.default_per_page == 0 {
            return Err("default_per_page must be greater than 0".to_string());
        }

        if let Some(recognition) = &self.recognition {
            if recognition.command.is_empty() {
                return Err(
                    "[recognition] section is present but command is empty".to_string(),
                );
            }
        }

        Ok(())
    }

    pub fn quiescence_delay(&self) -> Duration {
        Duration::from_secs(self.quiescence_secs)
    }
}
