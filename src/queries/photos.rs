use sea_query::{Expr, Order, Query, SqliteQueryBuilder};

use crate::schema::Photos;

/// INSERT INTO photos (detection_id, image_path, created_at_ms) VALUES (?, ?, ?) RETURNING id
pub fn insert(detection_id: i64, image_path: &str, created_at_ms: i64) -> String {
    Query::insert()
        .into_table(Photos::Table)
        .columns([Photos::DetectionId, Photos::ImagePath, Photos::CreatedAtMs])
        .values_panic([detection_id.into(), image_path.into(), created_at_ms.into()])
        .returning_col(Photos::Id)
        .to_string(SqliteQueryBuilder)
}

/// SELECT EXISTS(SELECT 1 FROM photos WHERE image_path = ?)
pub fn exists_by_path(image_path: &str) -> String {
    let subquery = Query::select()
        .expr(Expr::val(1))
        .from(Photos::Table)
        .and_where(Expr::col(Photos::ImagePath).eq(image_path))
        .to_owned();

    Query::select()
        .expr(Expr::exists(subquery))
        .to_string(SqliteQueryBuilder)
}

/// SELECT id, detection_id, image_path, created_at_ms FROM photos WHERE detection_id IN (...) ORDER BY id
pub fn select_for_detections(detection_ids: &[i64]) -> String {
    Query::select()
        .columns([
            Photos::Id,
            Photos::DetectionId,
            Photos::ImagePath,
            Photos::CreatedAtMs,
        ])
        .from(Photos::Table)
        .and_where(Expr::col(Photos::DetectionId).is_in(detection_ids.iter().copied()))
        .order_by(Photos::Id, Order::Asc)
        .to_string(SqliteQueryBuilder)
}
