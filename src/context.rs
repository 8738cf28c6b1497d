//! Request Context
//!
//! Every engine operation receives a `RequestContext`: who is acting, the
//! request id used to correlate logs, and the deadline all database work
//! must finish within.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use utoipa::ToSchema;

use crate::error::LedgerError;

/// Default per-request budget when the caller does not set one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Who caused an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorType {
    System,
    User,
    Backoffice,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::System => "SYSTEM",
            ActorType::User => "USER",
            ActorType::Backoffice => "BACKOFFICE",
        }
    }
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ActorType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SYSTEM" => Ok(ActorType::System),
            "USER" => Ok(ActorType::User),
            "BACKOFFICE" => Ok(ActorType::Backoffice),
            other => Err(LedgerError::BadRequest(format!("unknown actor type: {}", other))),
        }
    }
}

impl TryFrom<String> for ActorType {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Authenticated actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            actor_type: ActorType::System,
            actor_id: None,
        }
    }

    pub fn backoffice(id: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::Backoffice,
            actor_id: Some(id.into()),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::User,
            actor_id: Some(id.into()),
        }
    }
}

/// Per-request context threaded through every engine call
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub actor: Actor,
    pub deadline: Instant,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, actor: Actor, timeout: Duration) -> Self {
        Self {
            request_id: request_id.into(),
            actor,
            deadline: Instant::now() + timeout,
        }
    }

    /// Context for internal callers (tests, maintenance jobs)
    pub fn system() -> Self {
        Self::new(ulid::Ulid::new().to_string(), Actor::system(), DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now() + timeout;
        self
    }

    /// Time left before the deadline (zero once expired)
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Run `fut` under this context's deadline.
    ///
    /// Dropping an in-flight future drops its database transaction, which
    /// rolls it back.
    pub async fn run<T, F>(&self, op: &str, fut: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        match tokio::time::timeout_at(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(request_id = %self.request_id, op, "Deadline exceeded, rolled back");
                Err(LedgerError::Timeout(format!("{} exceeded the request deadline", op)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_type_roundtrip() {
        for t in [ActorType::System, ActorType::User, ActorType::Backoffice] {
            assert_eq!(t.as_str().parse::<ActorType>().unwrap(), t);
        }
        assert!("ROOT".parse::<ActorType>().is_err());
    }

    #[test]
    fn test_actor_type_serde() {
        assert_eq!(
            serde_json::to_string(&ActorType::Backoffice).unwrap(),
            "\"BACKOFFICE\""
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out() {
        let ctx = RequestContext::system().with_timeout(Duration::from_millis(50));
        let result: Result<(), _> = ctx
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;
        assert_eq!(result.unwrap_err().code(), "TIMEOUT");
    }

    #[tokio::test]
    async fn test_run_passes_result_through() {
        let ctx = RequestContext::system();
        let result = ctx.run("fast", async { Ok::<_, LedgerError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert!(!ctx.is_expired());
    }
}
