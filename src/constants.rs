/// Expected database schema version
/// All databases must use this version for compatibility
pub const EXPECTED_DB_VERSION: &str = "1";

/// Root folder under which every owner/session folder is allocated
pub const DEFAULT_FILES_DIR: &str = "client_files";

/// Photo extensions accepted for admission (compared case-insensitively)
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Quiescence delay before a session is handed to recognition without a "last" signal
pub const DEFAULT_QUIESCENCE_SECS: u64 = 180;

/// Page size used when a listing request does not give one
pub const DEFAULT_PER_PAGE: u32 = 5;

/// Largest request body accepted by the HTTP surface (one photo upload)
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
