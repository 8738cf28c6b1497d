//! Events whose delivery exhausted the retry budget

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: i64,
    pub topic: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub error: String,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDeadLetter {
    pub topic: String,
    pub payload: serde_json::Value,
    pub error: String,
    pub attempts: i32,
}

impl NewDeadLetter {
    pub fn into_dead_letter(self, id: i64, created_at: DateTime<Utc>) -> DeadLetter {
        DeadLetter {
            id,
            topic: self.topic,
            payload: self.payload,
            error: self.error,
            attempts: self.attempts,
            created_at,
        }
    }
}
