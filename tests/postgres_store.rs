//! PgStore against a live database
//!
//! Run with `cargo test --test postgres_store -- --ignored` and the `DB_*`
//! variables pointing at a scratch PostgreSQL.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;

use wallet_ledger::account::{AccountLookup, AccountService};
use wallet_ledger::audit::{AuditContext, AuditOperation, NewAudit};
use wallet_ledger::config::AppConfig;
use wallet_ledger::context::RequestContext;
use wallet_ledger::db::Database;
use wallet_ledger::exchange::{ExchangeEngine, ExchangeRequest};
use wallet_ledger::integrity::IntegrityChecker;
use wallet_ledger::money::{Amount, Version};
use wallet_ledger::reference::ReferenceAdmin;
use wallet_ledger::reference::admin::{NewExchangeRate, NewTier, NewUser, NewWallet, UpdateTier};
use wallet_ledger::reference::models::{Tier, Wallet};
use wallet_ledger::reference::{Governed, GovernedChange};
use wallet_ledger::store::{LedgerStore, PgStore};
use wallet_ledger::transaction::{PostRequest, TransactionEngine, TransactionKind};

async fn store() -> Arc<dyn LedgerStore> {
    let mut config = AppConfig::default();
    config.apply_env(|v| std::env::var(v).ok()).unwrap();
    let db = Database::connect(&config.database)
        .await
        .expect("Failed to connect");
    let store = PgStore::new(db);
    store.bootstrap().await.expect("Bootstrap failed");
    Arc::new(store)
}

/// Fresh slug so runs never collide
fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, ulid::Ulid::new().to_string().to_lowercase())
}

async fn wallet(admin: &ReferenceAdmin, is_monetary: bool) -> String {
    let id = unique("w");
    admin
        .create_wallet(
            &RequestContext::system(),
            &AuditContext::system(),
            NewWallet {
                id: id.clone(),
                name: id.clone(),
                currency_scale: if is_monetary { 100 } else { 1 },
                is_monetary,
            },
        )
        .await
        .unwrap();
    id
}

async fn user(admin: &ReferenceAdmin, tier_id: Option<String>) -> String {
    let id = unique("u");
    admin
        .create_user(
            &RequestContext::system(),
            &AuditContext::system(),
            NewUser {
                id: id.clone(),
                tier_id,
                is_active: true,
            },
        )
        .await
        .unwrap();
    id
}

#[tokio::test]
#[ignore] // Requires PostgreSQL running
async fn test_pg_post_replay_and_integrity() {
    let store = store().await;
    let admin = ReferenceAdmin::new(store.clone());
    let accounts = AccountService::new(store.clone());
    let engine = TransactionEngine::new(store.clone());
    let integrity = IntegrityChecker::new(store.clone());
    let ctx = RequestContext::system();

    let wallet_id = wallet(&admin, false).await;
    let user_id = user(&admin, None).await;
    let account = accounts.create_account(&ctx, &wallet_id, &user_id).await.unwrap();

    let deposit = PostRequest::new(&account.id, TransactionKind::Deposit, Amount::new(500).unwrap())
        .expecting(Version::new(0));
    let first = engine.post(&ctx, &wallet_id, deposit).await.unwrap();
    assert_eq!(first.account.balance.value(), 500);
    assert_eq!(first.account.version, Version::new(1));

    let refund = PostRequest::new(&account.id, TransactionKind::Refund, Amount::new(50).unwrap())
        .with_reference("order-42");
    let a = engine.post(&ctx, &wallet_id, refund.clone()).await.unwrap();
    let b = engine.post(&ctx, &wallet_id, refund).await.unwrap();
    assert!(b.replayed);
    assert_eq!(a.transaction.id, b.transaction.id);

    let err = engine
        .post(
            &ctx,
            &wallet_id,
            PostRequest::new(&account.id, TransactionKind::Withdraw, Amount::new(551).unwrap()),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_BALANCE");

    let report = integrity.check_wallet_integrity(&ctx, &wallet_id).await.unwrap();
    assert_eq!(report.accounts_sum, 550);
    assert_eq!(report.diff, 0);
}

#[tokio::test]
#[ignore]
async fn test_pg_concurrent_withdrawals() {
    let store = store().await;
    let admin = ReferenceAdmin::new(store.clone());
    let accounts = AccountService::new(store.clone());
    let engine = TransactionEngine::new(store.clone());
    let ctx = RequestContext::system();

    let wallet_id = wallet(&admin, false).await;
    let user_id = user(&admin, None).await;
    let account = accounts.create_account(&ctx, &wallet_id, &user_id).await.unwrap();
    engine
        .post(
            &ctx,
            &wallet_id,
            PostRequest::new(&account.id, TransactionKind::Deposit, Amount::new(100).unwrap()),
        )
        .await
        .unwrap();

    let engine = &engine;
    let wallet_id = wallet_id.as_str();
    let attempts = (0..2).map(|_| {
        let req = PostRequest::new(&account.id, TransactionKind::Withdraw, Amount::new(80).unwrap())
            .expecting(Version::new(1));
        async move { engine.post(&RequestContext::system(), wallet_id, req).await }
    });
    let results = futures::future::join_all(attempts).await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.into_iter().find_map(|r| r.err()).unwrap();
    assert_eq!(err.code(), "CONFLICT");
}

#[tokio::test]
#[ignore]
async fn test_pg_exchange_opens_destination_account() {
    let store = store().await;
    let admin = ReferenceAdmin::new(store.clone());
    let accounts = AccountService::new(store.clone());
    let engine = TransactionEngine::new(store.clone());
    let exchange = ExchangeEngine::new(store.clone());
    let ctx = RequestContext::system();
    let audit = AuditContext::system();

    let cash = wallet(&admin, true).await;
    let points = wallet(&admin, false).await;
    let tier_id = unique("t");
    admin
        .create_tier(
            &ctx,
            &audit,
            NewTier {
                id: tier_id.clone(),
                name: "Gold".into(),
                description: None,
            },
        )
        .await
        .unwrap();
    admin
        .create_exchange_rate(
            &ctx,
            &audit,
            NewExchangeRate {
                from_wallet_id: cash.clone(),
                to_wallet_id: points.clone(),
                tier_id: tier_id.clone(),
                rate: Decimal::from_str("2.5").unwrap(),
            },
        )
        .await
        .unwrap();
    let user_id = user(&admin, Some(tier_id)).await;
    let account = accounts.create_account(&ctx, &cash, &user_id).await.unwrap();
    engine
        .post(
            &ctx,
            &cash,
            PostRequest::new(&account.id, TransactionKind::Deposit, Amount::new(1000).unwrap()),
        )
        .await
        .unwrap();

    let outcome = exchange
        .exchange(
            &ctx,
            ExchangeRequest {
                from_wallet_id: cash.clone(),
                to_wallet_id: points.clone(),
                user_id: user_id.clone(),
                amount: Amount::new(400).unwrap(),
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.from_account.balance.value(), 600);
    assert_eq!(outcome.to.amount.value(), 10);
    assert_eq!(outcome.from.created_at, outcome.to.created_at);

    let to = accounts
        .get_account(&ctx, &points, AccountLookup::ByUser(user_id))
        .await
        .unwrap();
    assert_eq!(to.balance.value(), 10);

    // A wallet with accounts cannot be dropped
    let err = admin
        .remove::<Wallet>(&ctx, &audit, &points)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
}

#[tokio::test]
#[ignore]
async fn test_pg_update_audit_records_locked_row() {
    let store = store().await;
    let admin = ReferenceAdmin::new(store.clone());
    let ctx = RequestContext::system();
    let audit = AuditContext::system();

    let tier_id = unique("t");
    admin
        .create_tier(
            &ctx,
            &audit,
            NewTier {
                id: tier_id.clone(),
                name: "Gold".into(),
                description: None,
            },
        )
        .await
        .unwrap();
    let read = admin.get::<Tier>(&ctx, &tier_id).await.unwrap();
    admin
        .update_tier(
            &ctx,
            &audit,
            &tier_id,
            UpdateTier {
                name: "Gold II".into(),
                description: None,
            },
        )
        .await
        .unwrap();

    let late = Tier {
        name: "Platinum".into(),
        ..read
    }
    .into_record();
    let entry = NewAudit::new(&audit, "tiers", tier_id.clone(), AuditOperation::Update)
        .new_state(late.snapshot().unwrap());
    let row = store
        .apply_change(GovernedChange::Update(late), entry)
        .await
        .unwrap();
    assert_eq!(row.old_record.as_ref().unwrap()["name"], "Gold II");
}
