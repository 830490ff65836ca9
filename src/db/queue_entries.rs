use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::QueueEntry;

pub async fn enqueue(pool: &PgPool, registrant_id: &str) -> Result<QueueEntry, sqlx::Error> {
    sqlx::query_as::<_, QueueEntry>(
        "INSERT INTO g2p_que_id_generation (registrant_id)
         VALUES ($1) RETURNING *",
    )
    .bind(registrant_id)
    .fetch_one(pool)
    .await
}

pub async fn find_by_registrant(
    pool: &PgPool,
    registrant_id: &str,
) -> Result<Option<QueueEntry>, sqlx::Error> {
    sqlx::query_as::<_, QueueEntry>(
        "SELECT * FROM g2p_que_id_generation WHERE registrant_id = $1",
    )
    .bind(registrant_id)
    .fetch_optional(pool)
    .await
}

/// Write back the request bookkeeping columns while `holder` owns the lease.
/// Lease columns are left alone. Returns the number of rows updated.
pub async fn update_request_state(
    pool: &PgPool,
    entry: &QueueEntry,
    holder: Uuid,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE g2p_que_id_generation
         SET number_of_attempts_request = $2,
             id_generation_request_status = $3,
             id_generation_update_status = $4,
             last_attempt_datetime_request = $5,
             last_attempt_error_code_request = $6
         WHERE registrant_id = $1 AND leased_by = $7",
    )
    .bind(&entry.registrant_id)
    .bind(entry.number_of_attempts_request)
    .bind(entry.request_status.as_str())
    .bind(entry.update_status.as_str())
    .bind(entry.last_attempt_datetime_request)
    .bind(entry.last_attempt_error_code_request.as_deref())
    .bind(holder)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Claim the entry for `holder` unless another holder's lease is still live.
/// Re-claiming by the same holder extends the lease.
pub async fn try_lease(
    pool: &PgPool,
    registrant_id: &str,
    holder: Uuid,
    ttl: Duration,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE g2p_que_id_generation
         SET leased_by = $2,
             leased_until = now() + make_interval(secs => $3::double precision)
         WHERE registrant_id = $1
           AND (leased_until IS NULL OR leased_until < now() OR leased_by = $2)",
    )
    .bind(registrant_id)
    .bind(holder)
    .bind(ttl.as_secs_f64())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn release_lease(pool: &PgPool, registrant_id: &str, holder: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE g2p_que_id_generation
         SET leased_by = NULL, leased_until = NULL
         WHERE registrant_id = $1 AND leased_by = $2",
    )
    .bind(registrant_id)
    .bind(holder)
    .execute(pool)
    .await?;
    Ok(())
}
