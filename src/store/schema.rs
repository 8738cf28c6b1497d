//! Bootstrap DDL
//!
//! Idempotent `CREATE ... IF NOT EXISTS` statements, run at startup for the
//! shared tables and on wallet creation for the wallet's namespace.

use sqlx::PgConnection;

use crate::db::Namespace;

const SHARED_TABLES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS public.tiers (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        description TEXT,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS public.wallets (
        id             TEXT PRIMARY KEY,
        name           TEXT NOT NULL,
        currency_scale INTEGER NOT NULL DEFAULT 1,
        is_monetary    BOOLEAN NOT NULL DEFAULT FALSE,
        created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at     TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS public.users (
        id         TEXT PRIMARY KEY,
        tier_id    TEXT REFERENCES public.tiers(id),
        is_active  BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS public.exchange_rates (
        id             TEXT PRIMARY KEY,
        from_wallet_id TEXT NOT NULL REFERENCES public.wallets(id),
        to_wallet_id   TEXT NOT NULL REFERENCES public.wallets(id),
        tier_id        TEXT NOT NULL REFERENCES public.tiers(id),
        rate           NUMERIC(30, 10) NOT NULL CHECK (rate > 0),
        created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (from_wallet_id, to_wallet_id, tier_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS public.triggers (
        id               TEXT PRIMARY KEY,
        slug             TEXT NOT NULL UNIQUE,
        name             TEXT NOT NULL,
        description      TEXT,
        wallet_id        TEXT REFERENCES public.wallets(id),
        transaction_type TEXT NOT NULL CHECK (transaction_type IN ('CREDIT', 'DEBIT')),
        is_active        BOOLEAN NOT NULL DEFAULT TRUE,
        created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at       TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS public.programs (
        id         TEXT PRIMARY KEY,
        trigger_id TEXT NOT NULL REFERENCES public.triggers(id),
        name       TEXT NOT NULL,
        condition  JSONB NOT NULL DEFAULT '{}'::jsonb,
        effects    JSONB NOT NULL DEFAULT '[]'::jsonb,
        is_active  BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS public.audit (
        id         BIGSERIAL PRIMARY KEY,
        table_name TEXT NOT NULL,
        record_id  TEXT NOT NULL,
        operation  TEXT NOT NULL CHECK (operation IN ('CREATE', 'UPDATE', 'DELETE')),
        actor      TEXT NOT NULL,
        actor_id   TEXT,
        old_record JSONB,
        new_record JSONB,
        remarks    TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_audit_record ON public.audit (table_name, record_id, id)"#,
    r#"CREATE TABLE IF NOT EXISTS public.dead_letters (
        id         BIGSERIAL PRIMARY KEY,
        topic      TEXT NOT NULL,
        payload    JSONB NOT NULL,
        error      TEXT NOT NULL,
        attempts   INTEGER NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
];

/// Statements creating one wallet's namespace
pub fn wallet_statements(ns: &Namespace) -> Vec<String> {
    let schema = ns.quoted();
    vec![
        format!("CREATE SCHEMA IF NOT EXISTS {schema}"),
        format!(
            r#"CREATE TABLE IF NOT EXISTS {schema}.accounts (
                id         TEXT PRIMARY KEY,
                wallet_id  TEXT NOT NULL,
                user_id    TEXT NOT NULL,
                balance    BIGINT NOT NULL DEFAULT 0 CHECK (balance >= 0),
                version    BIGINT NOT NULL DEFAULT 0,
                is_active  BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (wallet_id, user_id)
            )"#
        ),
        format!("CREATE SEQUENCE IF NOT EXISTS {schema}.transaction_id_seq"),
        format!(
            r#"CREATE TABLE IF NOT EXISTS {schema}.transactions (
                id               BIGINT PRIMARY KEY,
                account_id       TEXT NOT NULL REFERENCES {schema}.accounts(id),
                tx_type          TEXT NOT NULL CHECK (tx_type IN ('CREDIT', 'DEBIT')),
                actor_type       TEXT NOT NULL,
                actor_id         TEXT,
                amount           BIGINT NOT NULL CHECK (amount >= 0),
                previous_balance BIGINT NOT NULL CHECK (previous_balance >= 0),
                new_balance      BIGINT NOT NULL CHECK (new_balance >= 0),
                version          BIGINT NOT NULL,
                metadata         JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                created_at       TIMESTAMPTZ NOT NULL DEFAULT now()
            )"#
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_transactions_reference ON {schema}.transactions \
             (account_id, (metadata->>'kind'), (metadata->>'reference'))"
        ),
    ]
}

/// Create the shared tables
pub async fn bootstrap_shared(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    for statement in SHARED_TABLES {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    tracing::info!("Shared schema ready");
    Ok(())
}

/// Create the namespace of one wallet
pub async fn bootstrap_wallet(conn: &mut PgConnection, ns: &Namespace) -> Result<(), sqlx::Error> {
    for statement in wallet_statements(ns) {
        sqlx::query(&statement).execute(&mut *conn).await?;
    }
    tracing::info!(schema = ns.schema(), "Wallet namespace ready");
    Ok(())
}
