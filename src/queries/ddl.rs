use sea_query::{ColumnDef, ForeignKey, ForeignKeyAction, Index, SqliteQueryBuilder, Table};

use crate::schema::{Cameras, Detections, Metadata, Photos};

/// CREATE TABLE IF NOT EXISTS metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL)
pub fn create_metadata_table() -> String {
    Table::create()
        .table(Metadata::Table)
        .if_not_exists()
        .col(ColumnDef::new(Metadata::Key).string().primary_key())
        .col(ColumnDef::new(Metadata::Value).string().not_null())
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS cameras (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     owner TEXT NOT NULL,
///     created_at_ms INTEGER NOT NULL
/// )
pub fn create_cameras_table() -> String {
    Table::create()
        .table(Cameras::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(Cameras::Id)
                .integer()
                .primary_key()
                .auto_increment(),
        )
        .col(ColumnDef::new(Cameras::Owner).string().not_null())
        .col(ColumnDef::new(Cameras::CreatedAtMs).big_integer().not_null())
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS detections (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     owner TEXT NOT NULL,
///     camera_id INTEGER NOT NULL REFERENCES cameras(id),
///     folder_path TEXT UNIQUE,
///     completed INTEGER NOT NULL DEFAULT 0,
///     created_at_ms INTEGER NOT NULL
/// )
pub fn create_detections_table() -> String {
    Table::create()
        .table(Detections::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(Detections::Id)
                .integer()
                .primary_key()
                .auto_increment(),
        )
        .col(ColumnDef::new(Detections::Owner).string().not_null())
        .col(ColumnDef::new(Detections::CameraId).integer().not_null())
        .col(ColumnDef::new(Detections::FolderPath).string().unique_key())
        .col(
            ColumnDef::new(Detections::Completed)
                .integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(Detections::CreatedAtMs)
                .big_integer()
                .not_null(),
        )
        .foreign_key(
            ForeignKey::create()
                .from(Detections::Table, Detections::CameraId)
                .to(Cameras::Table, Cameras::Id)
                .on_delete(ForeignKeyAction::Restrict),
        )
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS photos (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     detection_id INTEGER NOT NULL REFERENCES detections(id),
///     image_path TEXT NOT NULL UNIQUE,
///     created_at_ms INTEGER NOT NULL
/// )
pub fn create_photos_table() -> String {
    Table::create()
        .table(Photos::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(Photos::Id)
                .integer()
                .primary_key()
                .auto_increment(),
        )
        .col(ColumnDef::new(Photos::DetectionId).integer().not_null())
        .col(
            ColumnDef::new(Photos::ImagePath)
                .string()
                .not_null()
                .unique_key(),
        )
        .col(ColumnDef::new(Photos::CreatedAtMs).big_integer().not_null())
        .foreign_key(
            ForeignKey::create()
                .from(Photos::Table, Photos::DetectionId)
                .to(Detections::Table, Detections::Id)
                .on_delete(ForeignKeyAction::Restrict),
        )
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_detections_owner ON detections(owner)
pub fn create_detections_owner_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_detections_owner")
        .table(Detections::Table)
        .col(Detections::Owner)
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_photos_detection_id ON photos(detection_id)
pub fn create_photos_detection_id_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_photos_detection_id")
        .table(Photos::Table)
        .col(Photos::DetectionId)
        .to_string(SqliteQueryBuilder)
}
