pub mod cameras;
pub mod ddl;
pub mod detections;
pub mod metadata;
pub mod photos;
