use sea_query::{Expr, Func, Order, Query, SqliteQueryBuilder};

use crate::schema::Detections;

const COLUMNS: [Detections; 6] = [
    Detections::Id,
    Detections::Owner,
    Detections::CameraId,
    Detections::FolderPath,
    Detections::Completed,
    Detections::CreatedAtMs,
];

/// INSERT INTO detections (owner, camera_id, created_at_ms) VALUES (?, ?, ?) RETURNING id
///
/// folder_path stays NULL until the allocator has created the folder for the new id.
pub fn insert(owner: &str, camera_id: i64, created_at_ms: i64) -> String {
    Query::insert()
        .into_table(Detections::Table)
        .columns([
            Detections::Owner,
            Detections::CameraId,
            Detections::CreatedAtMs,
        ])
        .values_panic([owner.into(), camera_id.into(), created_at_ms.into()])
        .returning_col(Detections::Id)
        .to_string(SqliteQueryBuilder)
}

/// UPDATE detections SET folder_path = ? WHERE id = ?
pub fn set_folder_path(id: i64, folder_path: &str) -> String {
    Query::update()
        .table(Detections::Table)
        .value(Detections::FolderPath, folder_path)
        .and_where(Expr::col(Detections::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// SELECT id, owner, camera_id, folder_path, completed, created_at_ms FROM detections WHERE id = ?
pub fn select_by_id(id: i64) -> String {
    Query::select()
        .columns(COLUMNS)
        .from(Detections::Table)
        .and_where(Expr::col(Detections::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// SELECT COUNT(id) FROM detections WHERE owner = ?
pub fn count_for_owner(owner: &str) -> String {
    Query::select()
        .expr(Func::count(Expr::col(Detections::Id)))
        .from(Detections::Table)
        .and_where(Expr::col(Detections::Owner).eq(owner))
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM detections WHERE owner = ? ORDER BY id LIMIT ? OFFSET ?
///
/// Ids are AUTOINCREMENT, so id order is creation order.
pub fn select_page_for_owner(owner: &str, limit: u64, offset: u64) -> String {
    Query::select()
        .columns(COLUMNS)
        .from(Detections::Table)
        .and_where(Expr::col(Detections::Owner).eq(owner))
        .order_by(Detections::Id, Order::Asc)
        .limit(limit)
        .offset(offset)
        .to_string(SqliteQueryBuilder)
}

/// UPDATE detections SET completed = 1 WHERE id = ? AND completed = 0
///
/// Exactly one caller observes an affected row for a given session.
pub fn mark_completed(id: i64) -> String {
    Query::update()
        .table(Detections::Table)
        .value(Detections::Completed, 1)
        .and_where(Expr::col(Detections::Id).eq(id))
        .and_where(Expr::col(Detections::Completed).eq(0))
        .to_string(SqliteQueryBuilder)
}
