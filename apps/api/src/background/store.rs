use anyhow::Result;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::background::models::StructuredRecord;
use crate::models::background::BackgroundRecordRow;

/// Appends a new record for the user. Earlier records are kept as history.
pub async fn save_record(
    pool: &PgPool,
    user_id: Uuid,
    record: &StructuredRecord,
) -> Result<BackgroundRecordRow> {
    let row = sqlx::query_as::<_, BackgroundRecordRow>(
        r#"
        INSERT INTO background_records (id, user_id, record)
        VALUES ($1, $2, $3)
        RETURNING id, user_id, record, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(Json(record))
    .fetch_one(pool)
    .await?;

    info!("Stored background record {} for user {user_id}", row.id);
    Ok(row)
}

/// Returns the most recent record of a user, if any.
pub async fn latest_record(pool: &PgPool, user_id: Uuid) -> Result<Option<BackgroundRecordRow>> {
    Ok(sqlx::query_as::<_, BackgroundRecordRow>(
        r#"
        SELECT id, user_id, record, created_at
        FROM background_records
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?)
}
