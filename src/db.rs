use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;

use crate::constants::EXPECTED_DB_VERSION;
use crate::queries::{ddl, metadata};

type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Open a file-based database for production use, creating it if needed
/// Enables WAL mode and foreign keys
pub async fn open_database(db_path: &Path) -> Result<SqlitePool, DynError> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| format!("Failed to open database '{}': {}", db_path.display(), e))?;

    log::info!("SQLite database: {}", db_path.display());
    Ok(pool)
}

/// Initialize database schema
/// Creates tables and indexes, then stamps the schema version
pub async fn init_database_schema(pool: &SqlitePool) -> Result<(), DynError> {
    sqlx::query(&ddl::create_metadata_table())
        .execute(pool)
        .await?;
    sqlx::query(&ddl::create_cameras_table())
        .execute(pool)
        .await?;
    sqlx::query(&ddl::create_detections_table())
        .execute(pool)
        .await?;
    sqlx::query(&ddl::create_photos_table())
        .execute(pool)
        .await?;

    sqlx::query(&ddl::create_detections_owner_index())
        .execute(pool)
        .await?;
    sqlx::query(&ddl::create_photos_detection_id_index())
        .execute(pool)
        .await?;

    sqlx::query(&metadata::insert_or_ignore("version", EXPECTED_DB_VERSION))
        .execute(pool)
        .await?;

    Ok(())
}

/// Check that the database was created for this schema version
pub async fn verify_database_version(pool: &SqlitePool) -> Result<(), DynError> {
    let db_version: Option<String> = sqlx::query_scalar(&metadata::select_by_key("version"))
        .fetch_optional(pool)
        .await
        .map_err(|e| format!("Failed to read version from metadata: {}", e))?;

    match db_version {
        Some(version) if version == EXPECTED_DB_VERSION => Ok(()),
        Some(version) => Err(format!(
            "Unsupported database version: '{}'. This application only supports version '{}'",
            version, EXPECTED_DB_VERSION
        )
        .into()),
        None => Err("Database has no version stamp; run init-db first".into()),
    }
}

/// Open a database, initialize the schema and check its version
pub async fn open_and_init(db_path: &Path) -> Result<SqlitePool, DynError> {
    let pool = open_database(db_path).await?;
    init_database_schema(&pool).await?;
    verify_database_version(&pool).await?;
    Ok(pool)
}

/// Create a database in a temporary directory for testing
/// Returns (pool, guard) - keep the guard alive to prevent temp file deletion
pub async fn create_test_connection_in_temporary_file(
) -> Result<(SqlitePool, tempfile::TempDir), DynError> {
    let temp_dir = tempfile::tempdir()?;
    let db_path = temp_dir.path().join("test.sqlite");
    let pool = open_database(&db_path).await?;
    Ok((pool, temp_dir))
}
