use sea_query::{Expr, Query, SqliteQueryBuilder};

use crate::schema::Cameras;

/// INSERT INTO cameras (owner, created_at_ms) VALUES (?, ?) RETURNING id
pub fn insert(owner: &str, created_at_ms: i64) -> String {
    Query::insert()
        .into_table(Cameras::Table)
        .columns([Cameras::Owner, Cameras::CreatedAtMs])
        .values_panic([owner.into(), created_at_ms.into()])
        .returning_col(Cameras::Id)
        .to_string(SqliteQueryBuilder)
}

/// SELECT EXISTS(SELECT 1 FROM cameras WHERE id = ?)
pub fn exists(id: i64) -> String {
    let subquery = Query::select()
        .expr(Expr::val(1))
        .from(Cameras::Table)
        .and_where(Expr::col(Cameras::Id).eq(id))
        .to_owned();

    Query::select()
        .expr(Expr::exists(subquery))
        .to_string(SqliteQueryBuilder)
}
