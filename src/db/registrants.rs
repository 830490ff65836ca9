use sqlx::PgPool;

use crate::models::Registrant;

pub async fn create(pool: &PgPool, id: &str, name: Option<&str>) -> Result<Registrant, sqlx::Error> {
    sqlx::query_as::<_, Registrant>(
        "INSERT INTO res_partner (id, name) VALUES ($1, $2) RETURNING *",
    )
    .bind(id)
    .bind(name)
    .fetch_one(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Registrant>, sqlx::Error> {
    sqlx::query_as::<_, Registrant>("SELECT * FROM res_partner WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_unique_id(
    pool: &PgPool,
    unique_id: &str,
) -> Result<Option<Registrant>, sqlx::Error> {
    sqlx::query_as::<_, Registrant>("SELECT * FROM res_partner WHERE unique_id = $1 LIMIT 1")
        .bind(unique_id)
        .fetch_optional(pool)
        .await
}

/// Set `unique_id` only where none is held yet. Returns the number of rows
/// updated.
pub async fn assign_unique_id(pool: &PgPool, id: &str, unique_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE res_partner SET unique_id = $2 WHERE id = $1 AND unique_id IS NULL",
    )
    .bind(id)
    .bind(unique_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
