//! PostgreSQL ledger store
//!
//! Shared reference data lives in `public`; each wallet's accounts,
//! transactions and id sequence live in the schema `wallet_<id>`. Ledger
//! writes enter the namespace with a transaction-local `search_path`, lock
//! the account row with `FOR UPDATE`, and then apply the same plan the
//! in-memory store applies.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection, Postgres};

use super::schema;
use super::{LedgerStore, LedgerSums, Page, PostOutcome};
use crate::account::{Account, AccountLookup};
use crate::audit::{Audit, NewAudit};
use crate::context::{Actor, RequestContext};
use crate::db::{Database, Namespace, set_statement_timeout};
use crate::dispatcher::dead_letter::{DeadLetter, NewDeadLetter};
use crate::error::{LedgerError, LedgerResult};
use crate::exchange::{ExchangeOutcome, ExchangePlan};
use crate::reference::governed::{Governed, GovernedChange, GovernedKind, GovernedRecord};
use crate::reference::models::{ExchangeRate, Program, Tier, Trigger, User, Wallet};
use crate::transaction::engine::{Movement, plan_movement, plan_posting};
use crate::transaction::{PostRequest, Transaction, TransactionType};

const ACCOUNT_COLUMNS: &str =
    "id, wallet_id, user_id, balance, version, is_active, created_at, updated_at";
const TRANSACTION_COLUMNS: &str = "id, account_id, tx_type, actor_type, actor_id, amount, \
     previous_balance, new_balance, version, metadata, created_at";
const AUDIT_COLUMNS: &str = "id, table_name, record_id, operation, actor, actor_id, \
     old_record, new_record, remarks, created_at";

type PgTx<'c> = sqlx::Transaction<'c, Postgres>;

pub struct PgStore {
    db: Database,
}

impl PgStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the shared tables and make sure every wallet has its namespace
    pub async fn bootstrap(&self) -> LedgerResult<()> {
        let mut conn = self.db.pool().acquire().await?;
        schema::bootstrap_shared(&mut conn).await?;
        let wallets: Vec<String> = sqlx::query_scalar("SELECT id FROM public.wallets")
            .fetch_all(&mut *conn)
            .await?;
        for wallet_id in wallets {
            schema::bootstrap_wallet(&mut conn, &Namespace::for_wallet(&wallet_id)?).await?;
        }
        Ok(())
    }

    /// Begin a transaction bounded by the request deadline
    async fn begin(&self, ctx: &RequestContext) -> LedgerResult<PgTx<'_>> {
        let mut tx = self.db.pool().begin().await?;
        set_statement_timeout(&mut tx, ctx.remaining()).await?;
        Ok(tx)
    }

    async fn fetch_record<T>(&self, id: &str) -> LedgerResult<Option<GovernedRecord>>
    where
        T: Governed + for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let row: Option<T> =
            sqlx::query_as(&format!("SELECT * FROM public.{} WHERE id = $1", T::KIND.table()))
                .bind(id)
                .fetch_optional(self.db.pool())
                .await?;
        Ok(row.map(T::into_record))
    }

    async fn fetch_records<T>(&self, page: Page) -> LedgerResult<Vec<GovernedRecord>>
    where
        T: Governed + for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let rows: Vec<T> = sqlx::query_as(&format!(
            "SELECT * FROM public.{} ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
            T::KIND.table()
        ))
        .bind(page.limit as i64)
        .bind(page.offset())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(T::into_record).collect())
    }
}

/// `SUM` over BIGINT columns comes back as NUMERIC
fn whole_sum(sum: Decimal) -> LedgerResult<i128> {
    sum.trunc()
        .to_i128()
        .ok_or_else(|| LedgerError::Internal(format!("ledger sum out of range: {}", sum)))
}

// ============================================================================
// Governed writes
// ============================================================================

async fn insert_record(conn: &mut PgConnection, record: &GovernedRecord) -> LedgerResult<()> {
    match record {
        GovernedRecord::Wallet(w) => {
            sqlx::query(
                "INSERT INTO public.wallets (id, name, currency_scale, is_monetary, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&w.id)
            .bind(&w.name)
            .bind(w.currency_scale)
            .bind(w.is_monetary)
            .bind(w.created_at)
            .bind(w.updated_at)
            .execute(&mut *conn)
            .await?;
            schema::bootstrap_wallet(conn, &Namespace::for_wallet(&w.id)?).await?;
        }
        GovernedRecord::User(u) => {
            sqlx::query(
                "INSERT INTO public.users (id, tier_id, is_active, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&u.id)
            .bind(&u.tier_id)
            .bind(u.is_active)
            .bind(u.created_at)
            .bind(u.updated_at)
            .execute(conn)
            .await?;
        }
        GovernedRecord::Tier(t) => {
            sqlx::query(
                "INSERT INTO public.tiers (id, name, description, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&t.id)
            .bind(&t.name)
            .bind(&t.description)
            .bind(t.created_at)
            .bind(t.updated_at)
            .execute(conn)
            .await?;
        }
        GovernedRecord::ExchangeRate(r) => {
            sqlx::query(
                "INSERT INTO public.exchange_rates \
                 (id, from_wallet_id, to_wallet_id, tier_id, rate, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(&r.id)
            .bind(&r.from_wallet_id)
            .bind(&r.to_wallet_id)
            .bind(&r.tier_id)
            .bind(r.rate)
            .bind(r.created_at)
            .bind(r.updated_at)
            .execute(conn)
            .await?;
        }
        GovernedRecord::Trigger(t) => {
            sqlx::query(
                "INSERT INTO public.triggers \
                 (id, slug, name, description, wallet_id, transaction_type, is_active, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(&t.id)
            .bind(&t.slug)
            .bind(&t.name)
            .bind(&t.description)
            .bind(&t.wallet_id)
            .bind(t.transaction_type.as_str())
            .bind(t.is_active)
            .bind(t.created_at)
            .bind(t.updated_at)
            .execute(conn)
            .await?;
        }
        GovernedRecord::Program(p) => {
            sqlx::query(
                "INSERT INTO public.programs \
                 (id, trigger_id, name, condition, effects, is_active, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(&p.id)
            .bind(&p.trigger_id)
            .bind(&p.name)
            .bind(&p.condition)
            .bind(&p.effects)
            .bind(p.is_active)
            .bind(p.created_at)
            .bind(p.updated_at)
            .execute(conn)
            .await?;
        }
    }
    Ok(())
}

async fn update_record(conn: &mut PgConnection, record: &GovernedRecord) -> LedgerResult<()> {
    let result = match record {
        GovernedRecord::Wallet(w) => {
            sqlx::query(
                "UPDATE public.wallets SET name = $2, currency_scale = $3, updated_at = $4 WHERE id = $1",
            )
            .bind(&w.id)
            .bind(&w.name)
            .bind(w.currency_scale)
            .bind(w.updated_at)
            .execute(conn)
            .await?
        }
        GovernedRecord::User(u) => {
            sqlx::query(
                "UPDATE public.users SET tier_id = $2, is_active = $3, updated_at = $4 WHERE id = $1",
            )
            .bind(&u.id)
            .bind(&u.tier_id)
            .bind(u.is_active)
            .bind(u.updated_at)
            .execute(conn)
            .await?
        }
        GovernedRecord::Tier(t) => {
            sqlx::query(
                "UPDATE public.tiers SET name = $2, description = $3, updated_at = $4 WHERE id = $1",
            )
            .bind(&t.id)
            .bind(&t.name)
            .bind(&t.description)
            .bind(t.updated_at)
            .execute(conn)
            .await?
        }
        GovernedRecord::ExchangeRate(r) => {
            sqlx::query("UPDATE public.exchange_rates SET rate = $2, updated_at = $3 WHERE id = $1")
                .bind(&r.id)
                .bind(r.rate)
                .bind(r.updated_at)
                .execute(conn)
                .await?
        }
        GovernedRecord::Trigger(t) => {
            sqlx::query(
                "UPDATE public.triggers SET name = $2, description = $3, wallet_id = $4, \
                 transaction_type = $5, is_active = $6, updated_at = $7 WHERE id = $1",
            )
            .bind(&t.id)
            .bind(&t.name)
            .bind(&t.description)
            .bind(&t.wallet_id)
            .bind(t.transaction_type.as_str())
            .bind(t.is_active)
            .bind(t.updated_at)
            .execute(conn)
            .await?
        }
        GovernedRecord::Program(p) => {
            sqlx::query(
                "UPDATE public.programs SET name = $2, condition = $3, effects = $4, \
                 is_active = $5, updated_at = $6 WHERE id = $1",
            )
            .bind(&p.id)
            .bind(&p.name)
            .bind(&p.condition)
            .bind(&p.effects)
            .bind(p.is_active)
            .bind(p.updated_at)
            .execute(conn)
            .await?
        }
    };
    if result.rows_affected() == 0 {
        return Err(LedgerError::not_found(record.kind().entity(), record.id()));
    }
    Ok(())
}

async fn lock_typed<T>(conn: &mut PgConnection, id: &str) -> LedgerResult<Option<GovernedRecord>>
where
    T: Governed + for<'r> FromRow<'r, PgRow> + Send + Unpin,
{
    let row: Option<T> = sqlx::query_as(&format!(
        "SELECT * FROM public.{} WHERE id = $1 FOR UPDATE",
        T::KIND.table()
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(T::into_record))
}

/// Current row of a governed record, locked until the transaction ends
async fn lock_record(conn: &mut PgConnection, kind: GovernedKind, id: &str) -> LedgerResult<GovernedRecord> {
    let record = match kind {
        GovernedKind::Wallet => lock_typed::<Wallet>(conn, id).await?,
        GovernedKind::User => lock_typed::<User>(conn, id).await?,
        GovernedKind::Tier => lock_typed::<Tier>(conn, id).await?,
        GovernedKind::ExchangeRate => lock_typed::<ExchangeRate>(conn, id).await?,
        GovernedKind::Trigger => lock_typed::<Trigger>(conn, id).await?,
        GovernedKind::Program => lock_typed::<Program>(conn, id).await?,
    };
    record.ok_or_else(|| LedgerError::not_found(kind.entity(), id))
}

/// Checks the foreign keys cannot express: references held in wallet schemas
async fn ensure_deletable(conn: &mut PgConnection, kind: GovernedKind, id: &str) -> LedgerResult<()> {
    match kind {
        GovernedKind::Wallet => {
            let ns = Namespace::for_wallet(id)?;
            let has_accounts: bool = sqlx::query_scalar(&format!(
                "SELECT EXISTS (SELECT 1 FROM {})",
                ns.table("accounts")
            ))
            .fetch_one(conn)
            .await?;
            if has_accounts {
                return Err(LedgerError::Conflict(format!("wallet {} has accounts", id)));
            }
        }
        GovernedKind::User => {
            let wallets: Vec<String> = sqlx::query_scalar("SELECT id FROM public.wallets")
                .fetch_all(&mut *conn)
                .await?;
            for wallet_id in wallets {
                let ns = Namespace::for_wallet(&wallet_id)?;
                let active: bool = sqlx::query_scalar(&format!(
                    "SELECT EXISTS (SELECT 1 FROM {} WHERE user_id = $1 AND is_active)",
                    ns.table("accounts")
                ))
                .bind(id)
                .fetch_one(&mut *conn)
                .await?;
                if active {
                    return Err(LedgerError::Conflict(format!(
                        "user {} has an active account in wallet {}",
                        id, wallet_id
                    )));
                }
            }
        }
        // Remaining references are foreign keys (23503 -> CONFLICT)
        _ => {}
    }
    Ok(())
}

async fn insert_audit(conn: &mut PgConnection, audit: &NewAudit) -> LedgerResult<Audit> {
    let row: Audit = sqlx::query_as(&format!(
        "INSERT INTO public.audit \
         (table_name, record_id, operation, actor, actor_id, old_record, new_record, remarks) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {AUDIT_COLUMNS}"
    ))
    .bind(audit.table_name)
    .bind(&audit.record_id)
    .bind(audit.operation.as_str())
    .bind(audit.actor.as_str())
    .bind(&audit.actor_id)
    .bind(&audit.old_record)
    .bind(&audit.new_record)
    .bind(&audit.remarks)
    .fetch_one(conn)
    .await?;
    Ok(row)
}

// ============================================================================
// Ledger writes
// ============================================================================

async fn lock_account(conn: &mut PgConnection, lookup: &AccountLookup) -> LedgerResult<Option<Account>> {
    let (column, value) = match lookup {
        AccountLookup::ById(id) => ("id", id),
        AccountLookup::ByUser(user) => ("user_id", user),
    };
    let account = sqlx::query_as(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {column} = $1 FOR UPDATE"
    ))
    .bind(value)
    .fetch_optional(conn)
    .await?;
    Ok(account)
}

async fn next_transaction_id(conn: &mut PgConnection) -> LedgerResult<i64> {
    let id: i64 = sqlx::query_scalar("SELECT nextval('transaction_id_seq')")
        .fetch_one(conn)
        .await?;
    Ok(id)
}

async fn insert_transaction(conn: &mut PgConnection, tx: &Transaction) -> LedgerResult<()> {
    sqlx::query(&format!(
        "INSERT INTO transactions ({TRANSACTION_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
    ))
    .bind(tx.id)
    .bind(&tx.account_id)
    .bind(tx.tx_type.as_str())
    .bind(tx.actor_type.as_str())
    .bind(&tx.actor_id)
    .bind(tx.amount.value())
    .bind(tx.previous_balance.value())
    .bind(tx.new_balance.value())
    .bind(tx.version.value())
    .bind(&tx.metadata)
    .bind(tx.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Write the planned balance; the version predicate guards against a row
/// that changed under us despite the lock.
async fn store_movement(
    conn: &mut PgConnection,
    account: &Account,
    movement: &Movement,
    now: DateTime<Utc>,
) -> LedgerResult<()> {
    let result = sqlx::query(
        "UPDATE accounts SET balance = $1, version = $2, updated_at = $3 \
         WHERE id = $4 AND version = $5",
    )
    .bind(movement.new_balance.value())
    .bind(movement.version.value())
    .bind(now)
    .bind(&account.id)
    .bind(account.version.value())
    .execute(conn)
    .await?;
    if result.rows_affected() != 1 {
        return Err(LedgerError::VersionMismatch {
            account_id: account.id.clone(),
            expected: account.version.value(),
            actual: -1,
        });
    }
    Ok(())
}

/// Apply one planned leg inside the current namespace
async fn write_leg(
    conn: &mut PgConnection,
    account: &Account,
    movement: Movement,
    actor: &Actor,
    metadata: serde_json::Value,
    now: DateTime<Utc>,
) -> LedgerResult<(Transaction, Account)> {
    let tx_id = next_transaction_id(&mut *conn).await?;
    let transaction = movement.into_transaction(
        tx_id,
        &account.id,
        actor.actor_type,
        actor.actor_id.clone(),
        metadata,
        now,
    );
    insert_transaction(&mut *conn, &transaction).await?;
    store_movement(&mut *conn, account, &movement, now).await?;

    let mut updated = account.clone();
    movement.apply_to(&mut updated, now);
    Ok((transaction, updated))
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn ping(&self) -> LedgerResult<()> {
        self.db.health_check().await?;
        Ok(())
    }

    async fn get_record(&self, kind: GovernedKind, id: &str) -> LedgerResult<Option<GovernedRecord>> {
        match kind {
            GovernedKind::Wallet => self.fetch_record::<Wallet>(id).await,
            GovernedKind::User => self.fetch_record::<User>(id).await,
            GovernedKind::Tier => self.fetch_record::<Tier>(id).await,
            GovernedKind::ExchangeRate => self.fetch_record::<ExchangeRate>(id).await,
            GovernedKind::Trigger => self.fetch_record::<Trigger>(id).await,
            GovernedKind::Program => self.fetch_record::<Program>(id).await,
        }
    }

    async fn list_records(&self, kind: GovernedKind, page: Page) -> LedgerResult<Vec<GovernedRecord>> {
        match kind {
            GovernedKind::Wallet => self.fetch_records::<Wallet>(page).await,
            GovernedKind::User => self.fetch_records::<User>(page).await,
            GovernedKind::Tier => self.fetch_records::<Tier>(page).await,
            GovernedKind::ExchangeRate => self.fetch_records::<ExchangeRate>(page).await,
            GovernedKind::Trigger => self.fetch_records::<Trigger>(page).await,
            GovernedKind::Program => self.fetch_records::<Program>(page).await,
        }
    }

    async fn find_exchange_rate(
        &self,
        from_wallet_id: &str,
        to_wallet_id: &str,
        tier_id: &str,
    ) -> LedgerResult<Option<ExchangeRate>> {
        let rate = sqlx::query_as(
            "SELECT * FROM public.exchange_rates \
             WHERE from_wallet_id = $1 AND to_wallet_id = $2 AND tier_id = $3",
        )
        .bind(from_wallet_id)
        .bind(to_wallet_id)
        .bind(tier_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(rate)
    }

    async fn matching_triggers(&self, wallet_id: &str, tx_type: TransactionType) -> LedgerResult<Vec<Trigger>> {
        let triggers = sqlx::query_as(
            "SELECT * FROM public.triggers \
             WHERE is_active AND transaction_type = $1 AND (wallet_id IS NULL OR wallet_id = $2) \
             ORDER BY slug",
        )
        .bind(tx_type.as_str())
        .bind(wallet_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(triggers)
    }

    async fn apply_change(&self, change: GovernedChange, mut audit: NewAudit) -> LedgerResult<Audit> {
        let mut tx = self.db.pool().begin().await?;

        match &change {
            GovernedChange::Create(record) => insert_record(&mut tx, record).await?,
            GovernedChange::Update(record) => {
                let old = lock_record(&mut tx, record.kind(), record.id()).await?;
                audit = audit.old(old.snapshot()?);
                update_record(&mut tx, record).await?
            }
            GovernedChange::Delete(kind, id) => {
                let old = lock_record(&mut tx, *kind, id).await?;
                audit = audit.old(old.snapshot()?);
                ensure_deletable(&mut tx, *kind, id).await?;
                let result = sqlx::query(&format!("DELETE FROM public.{} WHERE id = $1", kind.table()))
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                if result.rows_affected() == 0 {
                    return Err(LedgerError::not_found(kind.entity(), id));
                }
                if *kind == GovernedKind::Wallet {
                    let ns = Namespace::for_wallet(id)?;
                    sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", ns.quoted()))
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        let row = insert_audit(&mut tx, &audit).await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn audit_for_record(&self, table: &str, record_id: &str) -> LedgerResult<Vec<Audit>> {
        let rows = sqlx::query_as(&format!(
            "SELECT {AUDIT_COLUMNS} FROM public.audit WHERE table_name = $1 AND record_id = $2 ORDER BY id"
        ))
        .bind(table)
        .bind(record_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    async fn list_audit(&self, page: Page) -> LedgerResult<Vec<Audit>> {
        let rows = sqlx::query_as(&format!(
            "SELECT {AUDIT_COLUMNS} FROM public.audit ORDER BY id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(page.limit as i64)
        .bind(page.offset())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    async fn insert_account(&self, account: &Account) -> LedgerResult<Account> {
        let ns = Namespace::for_wallet(&account.wallet_id)?;
        let row = sqlx::query_as(&format!(
            "INSERT INTO {} ({ACCOUNT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {ACCOUNT_COLUMNS}",
            ns.table("accounts")
        ))
        .bind(&account.id)
        .bind(&account.wallet_id)
        .bind(&account.user_id)
        .bind(account.balance.value())
        .bind(account.version.value())
        .bind(account.is_active)
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(self.db.pool())
        .await?;
        Ok(row)
    }

    async fn find_account(&self, wallet_id: &str, lookup: &AccountLookup) -> LedgerResult<Option<Account>> {
        let ns = Namespace::for_wallet(wallet_id)?;
        let (column, value) = match lookup {
            AccountLookup::ById(id) => ("id", id),
            AccountLookup::ByUser(user) => ("user_id", user),
        };
        let row = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM {} WHERE {column} = $1",
            ns.table("accounts")
        ))
        .bind(value)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    async fn list_accounts(&self, wallet_id: &str, page: Page) -> LedgerResult<Vec<Account>> {
        let ns = Namespace::for_wallet(wallet_id)?;
        let rows = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM {} ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
            ns.table("accounts")
        ))
        .bind(page.limit as i64)
        .bind(page.offset())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    async fn deactivate_account(
        &self,
        ctx: &RequestContext,
        wallet_id: &str,
        account_id: &str,
    ) -> LedgerResult<Account> {
        let ns = Namespace::for_wallet(wallet_id)?;
        let mut tx = self.begin(ctx).await?;
        ns.enter(&mut tx).await?;

        let account = lock_account(&mut tx, &AccountLookup::ById(account_id.to_string()))
            .await?
            .filter(|a| a.is_active)
            .ok_or_else(|| LedgerError::not_found("account", account_id))?;
        if !account.balance.is_zero() {
            return Err(LedgerError::Conflict(format!(
                "account {} still holds {}",
                account_id, account.balance
            )));
        }

        let updated: Account = sqlx::query_as(&format!(
            "UPDATE accounts SET is_active = FALSE, version = version + 1, updated_at = now() \
             WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(account_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn post(&self, ctx: &RequestContext, wallet_id: &str, req: &PostRequest) -> LedgerResult<PostOutcome> {
        let ns = Namespace::for_wallet(wallet_id)?;
        let mut tx = self.begin(ctx).await?;
        ns.enter(&mut tx).await?;

        let account = lock_account(&mut tx, &AccountLookup::ById(req.account_id.clone()))
            .await?
            .ok_or_else(|| LedgerError::not_found("account", &req.account_id))?;

        if let Some(reference) = req.reference.as_deref() {
            let existing: Option<Transaction> = sqlx::query_as(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions \
                 WHERE account_id = $1 AND metadata->>'kind' = $2 AND metadata->>'reference' = $3 \
                 ORDER BY id LIMIT 1"
            ))
            .bind(&account.id)
            .bind(req.kind.as_str())
            .bind(reference)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(transaction) = existing {
                tx.rollback().await?;
                return Ok(PostOutcome {
                    transaction,
                    account,
                    replayed: true,
                });
            }
        }

        let plan = plan_posting(&account, req)?;
        let now = Utc::now();
        let actor = Actor {
            actor_type: req.actor_type,
            actor_id: req.actor_id.clone(),
        };
        let (transaction, account) = write_leg(
            &mut tx,
            &account,
            plan.movement,
            &actor,
            plan.metadata,
            now,
        )
        .await?;
        tx.commit().await?;

        Ok(PostOutcome {
            transaction,
            account,
            replayed: false,
        })
    }

    async fn exchange(&self, ctx: &RequestContext, plan: &ExchangePlan) -> LedgerResult<ExchangeOutcome> {
        let from_ns = Namespace::for_wallet(&plan.from_wallet_id)?;
        let to_ns = Namespace::for_wallet(&plan.to_wallet_id)?;
        let mut tx = self.begin(ctx).await?;
        let now = Utc::now();
        let user = AccountLookup::ByUser(plan.user_id.clone());

        let mut from_account = None;
        let mut to_account = None;

        // Lock in wallet-id order
        for wallet_id in plan.lock_order() {
            if wallet_id == plan.from_wallet_id {
                from_ns.enter(&mut tx).await?;
                let account = lock_account(&mut tx, &user).await?.ok_or_else(|| {
                    LedgerError::not_found("account", format!("{}/user:{}", plan.from_wallet_id, plan.user_id))
                })?;
                from_account = Some(account);
            } else {
                to_ns.enter(&mut tx).await?;
                let fresh = Account::open(&plan.to_wallet_id, &plan.user_id, now);
                sqlx::query(&format!(
                    "INSERT INTO accounts ({ACCOUNT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                     ON CONFLICT (wallet_id, user_id) DO NOTHING"
                ))
                .bind(&fresh.id)
                .bind(&fresh.wallet_id)
                .bind(&fresh.user_id)
                .bind(fresh.balance.value())
                .bind(fresh.version.value())
                .bind(fresh.is_active)
                .bind(fresh.created_at)
                .bind(fresh.updated_at)
                .execute(&mut *tx)
                .await?;
                let account = lock_account(&mut tx, &user).await?.ok_or_else(|| {
                    LedgerError::Internal(format!("destination account for {} vanished", plan.user_id))
                })?;
                to_account = Some(account);
            }
        }

        let (Some(from_account), Some(to_account)) = (from_account, to_account) else {
            return Err(LedgerError::Internal("exchange lock order skipped a wallet".to_string()));
        };

        let debit = plan_movement(&from_account, TransactionType::Debit, plan.amount, Some(plan.from_version))?;
        let credit = plan_movement(&to_account, TransactionType::Credit, plan.credited, plan.to_version)?;
        from_ns.enter(&mut tx).await?;
        let (from_tx, from_account) = write_leg(
            &mut tx,
            &from_account,
            debit,
            &plan.actor,
            plan.leg_metadata(&plan.to_wallet_id),
            now,
        )
        .await?;

        to_ns.enter(&mut tx).await?;
        let (to_tx, to_account) = write_leg(
            &mut tx,
            &to_account,
            credit,
            &plan.actor,
            plan.leg_metadata(&plan.from_wallet_id),
            now,
        )
        .await?;

        tx.commit().await?;
        Ok(ExchangeOutcome {
            from: from_tx,
            to: to_tx,
            from_account,
            to_account,
        })
    }

    async fn list_transactions(
        &self,
        wallet_id: &str,
        account_id: Option<&str>,
        page: Page,
    ) -> LedgerResult<Vec<Transaction>> {
        let ns = Namespace::for_wallet(wallet_id)?;
        let rows = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM {} \
             WHERE ($1::text IS NULL OR account_id = $1) \
             ORDER BY id DESC LIMIT $2 OFFSET $3",
            ns.table("transactions")
        ))
        .bind(account_id)
        .bind(page.limit as i64)
        .bind(page.offset())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    async fn ledger_sums(&self, wallet_id: &str) -> LedgerResult<LedgerSums> {
        let ns = Namespace::for_wallet(wallet_id)?;
        let mut tx = self.db.pool().begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let accounts_sum: Decimal = sqlx::query_scalar(&format!(
            "SELECT COALESCE(SUM(balance), 0)::NUMERIC FROM {}",
            ns.table("accounts")
        ))
        .fetch_one(&mut *tx)
        .await?;
        let transactions_sum: Decimal = sqlx::query_scalar(&format!(
            "SELECT COALESCE(SUM(CASE WHEN tx_type = 'CREDIT' THEN amount::NUMERIC ELSE -(amount::NUMERIC) END), 0) FROM {}",
            ns.table("transactions")
        ))
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(LedgerSums {
            accounts_sum: whole_sum(accounts_sum)?,
            transactions_sum: whole_sum(transactions_sum)?,
        })
    }

    async fn record_dead_letter(&self, letter: NewDeadLetter) -> LedgerResult<DeadLetter> {
        let row = sqlx::query_as(
            "INSERT INTO public.dead_letters (topic, payload, error, attempts) VALUES ($1, $2, $3, $4) \
             RETURNING id, topic, payload, error, attempts, created_at",
        )
        .bind(&letter.topic)
        .bind(&letter.payload)
        .bind(&letter.error)
        .bind(letter.attempts)
        .fetch_one(self.db.pool())
        .await?;
        Ok(row)
    }

    async fn list_dead_letters(&self, page: Page) -> LedgerResult<Vec<DeadLetter>> {
        let rows = sqlx::query_as(
            "SELECT id, topic, payload, error, attempts, created_at FROM public.dead_letters \
             ORDER BY id DESC LIMIT $1 OFFSET $2",
        )
        .bind(page.limit as i64)
        .bind(page.offset())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }
}
