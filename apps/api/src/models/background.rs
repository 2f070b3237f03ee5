use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// One stored extraction result. `record` holds the serialized `StructuredRecord`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BackgroundRecordRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub record: Value,
    pub created_at: DateTime<Utc>,
}
