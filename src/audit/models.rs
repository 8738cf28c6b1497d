//! Audit records for governed entities

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::context::{Actor, ActorType};
use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOperation {
    Create,
    Update,
    Delete,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Create => "CREATE",
            AuditOperation::Update => "UPDATE",
            AuditOperation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuditOperation {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(AuditOperation::Create),
            "UPDATE" => Ok(AuditOperation::Update),
            "DELETE" => Ok(AuditOperation::Delete),
            other => Err(LedgerError::Internal(format!("unknown audit operation: {}", other))),
        }
    }
}

impl TryFrom<String> for AuditOperation {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Append-only audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Audit {
    pub id: i64,
    /// Table of the governed entity (e.g. `tiers`)
    #[serde(rename = "table")]
    pub table_name: String,
    pub record_id: String,
    #[sqlx(try_from = "String")]
    pub operation: AuditOperation,
    #[sqlx(try_from = "String")]
    pub actor: ActorType,
    pub actor_id: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub old_record: Option<serde_json::Value>,
    #[schema(value_type = Option<Object>)]
    pub new_record: Option<serde_json::Value>,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Who is changing governed data, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditContext {
    pub actor: ActorType,
    pub actor_id: Option<String>,
    pub remarks: Option<String>,
}

impl AuditContext {
    pub fn new(actor: &Actor) -> Self {
        Self {
            actor: actor.actor_type,
            actor_id: actor.actor_id.clone(),
            remarks: None,
        }
    }

    pub fn system() -> Self {
        Self::new(&Actor::system())
    }

    pub fn with_remarks(mut self, remarks: Option<String>) -> Self {
        self.remarks = remarks;
        self
    }
}

/// Audit row waiting to be written with its mutation
#[derive(Debug, Clone, PartialEq)]
pub struct NewAudit {
    pub table_name: &'static str,
    pub record_id: String,
    pub operation: AuditOperation,
    pub actor: ActorType,
    pub actor_id: Option<String>,
    pub old_record: Option<serde_json::Value>,
    pub new_record: Option<serde_json::Value>,
    pub remarks: Option<String>,
}

impl NewAudit {
    pub fn new(
        ctx: &AuditContext,
        table_name: &'static str,
        record_id: impl Into<String>,
        operation: AuditOperation,
    ) -> Self {
        Self {
            table_name,
            record_id: record_id.into(),
            operation,
            actor: ctx.actor,
            actor_id: ctx.actor_id.clone(),
            old_record: None,
            new_record: None,
            remarks: ctx.remarks.clone(),
        }
    }

    pub fn old(mut self, snapshot: serde_json::Value) -> Self {
        self.old_record = Some(snapshot);
        self
    }

    pub fn new_state(mut self, snapshot: serde_json::Value) -> Self {
        self.new_record = Some(snapshot);
        self
    }

    /// Materialise with the id and timestamp assigned by the store
    pub fn into_audit(self, id: i64, created_at: DateTime<Utc>) -> Audit {
        Audit {
            id,
            table_name: self.table_name.to_string(),
            record_id: self.record_id,
            operation: self.operation,
            actor: self.actor,
            actor_id: self.actor_id,
            old_record: self.old_record,
            new_record: self.new_record,
            remarks: self.remarks,
            created_at,
        }
    }
}
