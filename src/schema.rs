use sea_query::Iden;

/// Metadata table - key-value store for database configuration
#[derive(Iden)]
pub enum Metadata {
    Table,
    Key,
    Value,
}

/// Cameras table - devices registered by an owner
#[derive(Iden)]
pub enum Cameras {
    Table,
    Id,
    Owner,
    CreatedAtMs,
}

/// Detections table - one row per detection session
#[derive(Iden)]
pub enum Detections {
    Table,
    Id,
    Owner,
    CameraId,
    FolderPath,
    Completed,
    CreatedAtMs,
}

/// Photos table - admitted photos, one file each
#[derive(Iden)]
pub enum Photos {
    Table,
    Id,
    DetectionId,
    ImagePath,
    CreatedAtMs,
}
