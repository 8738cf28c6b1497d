//! Database connection management and wallet namespaces

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::PgConnection;

use crate::config::DatabaseConfig;
use crate::error::LedgerResult;
use crate::reference::validation::Slug;

/// PostgreSQL database connection pool
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let ssl_mode: PgSslMode = config
            .sslmode
            .parse()
            .map_err(|e: sqlx::Error| sqlx::Error::Configuration(e.to_string().into()))?;
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name)
            .ssl_mode(ssl_mode);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect_with(options)
            .await?;

        tracing::info!(host = %config.host, database = %config.name, "PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ============================================================================
// Namespace
// ============================================================================

/// Storage namespace of one wallet: the schema `wallet_<id>`.
///
/// The wallet id is a validated slug, so the schema name is safe to splice
/// into SQL once double-quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    schema: String,
}

impl Namespace {
    pub fn for_wallet(wallet_id: &str) -> LedgerResult<Self> {
        let slug = Slug::new("walletId", wallet_id)?;
        Ok(Self {
            schema: format!("wallet_{}", slug),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// `"wallet_<id>"`, for DDL and qualified names
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.schema)
    }

    /// `"wallet_<id>".<table>`
    pub fn table(&self, table: &str) -> String {
        format!("{}.{}", self.quoted(), table)
    }

    /// Point unqualified names at this namespace for the rest of the
    /// enclosing transaction. Nested entries simply switch the path.
    pub async fn enter(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT set_config('search_path', $1, true)")
            .bind(format!("{}, public", self.quoted()))
            .execute(conn)
            .await?;
        Ok(())
    }
}

/// Apply the remaining request budget as a transaction-local statement timeout
pub async fn set_statement_timeout(conn: &mut PgConnection, budget: Duration) -> Result<(), sqlx::Error> {
    let millis = budget.as_millis().max(1);
    sqlx::query("SELECT set_config('statement_timeout', $1, true)")
        .bind(millis.to_string())
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_names() {
        let ns = Namespace::for_wallet("gold-points").unwrap();
        assert_eq!(ns.schema(), "wallet_gold-points");
        assert_eq!(ns.quoted(), "\"wallet_gold-points\"");
        assert_eq!(ns.table("accounts"), "\"wallet_gold-points\".accounts");
    }

    #[test]
    fn test_namespace_rejects_unsafe_ids() {
        assert!(Namespace::for_wallet("x\"; DROP SCHEMA public; --").is_err());
        assert!(Namespace::for_wallet("").is_err());
    }

    // Note: These tests require a running PostgreSQL instance

    fn test_config() -> DatabaseConfig {
        DatabaseConfig::default()
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL running
    async fn test_database_connect_success() {
        let db = Database::connect(&test_config()).await;
        assert!(db.is_ok(), "Should connect to PostgreSQL successfully");
    }

    #[tokio::test]
    #[ignore]
    async fn test_database_connect_invalid_port() {
        let config = DatabaseConfig {
            port: 9,
            acquire_timeout_ms: 500,
            ..test_config()
        };
        assert!(Database::connect(&config).await.is_err());
    }

    #[tokio::test]
    #[ignore]
    async fn test_database_health_check() {
        let db = Database::connect(&test_config())
            .await
            .expect("Failed to connect");
        assert!(db.health_check().await.is_ok(), "Health check should pass");
    }
}
