//! End-to-end ledger scenarios against the in-memory store

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use wallet_ledger::account::{Account, AccountLookup, AccountService};
use wallet_ledger::audit::{AuditContext, AuditOperation, NewAudit};
use wallet_ledger::context::{Actor, ActorType, RequestContext};
use wallet_ledger::dispatcher::{BackoffPolicy, MemoryPublisher, ProgramDispatcher};
use wallet_ledger::error::LedgerError;
use wallet_ledger::exchange::{ExchangeEngine, ExchangePlan, ExchangeRequest};
use wallet_ledger::integrity::IntegrityChecker;
use wallet_ledger::money::{Amount, Version};
use wallet_ledger::reference::admin::{NewExchangeRate, NewTier, NewTrigger, NewUser, NewWallet};
use wallet_ledger::reference::models::Tier;
use wallet_ledger::reference::admin::UpdateTier;
use wallet_ledger::reference::{Governed, GovernedChange, ReferenceAdmin};
use wallet_ledger::store::{LedgerStore, MemoryStore, Page};
use wallet_ledger::transaction::{PostRequest, TransactionEngine, TransactionKind, TransactionType};

struct Ledger {
    store: Arc<MemoryStore>,
    admin: ReferenceAdmin,
    accounts: AccountService,
    engine: TransactionEngine,
    exchange: ExchangeEngine,
    integrity: IntegrityChecker,
}

impl Ledger {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let shared: Arc<dyn LedgerStore> = store.clone();
        Self {
            admin: ReferenceAdmin::new(shared.clone()),
            accounts: AccountService::new(shared.clone()),
            engine: TransactionEngine::new(shared.clone()),
            exchange: ExchangeEngine::new(shared.clone()),
            integrity: IntegrityChecker::new(shared),
            store,
        }
    }

    fn with_dispatcher(dispatcher: impl FnOnce(Arc<dyn LedgerStore>) -> ProgramDispatcher) -> Self {
        let mut ledger = Self::new();
        let shared: Arc<dyn LedgerStore> = ledger.store.clone();
        let dispatcher = Arc::new(dispatcher(shared.clone()));
        ledger.engine = TransactionEngine::new(shared).with_dispatcher(dispatcher);
        ledger
    }

    async fn wallet(&self, id: &str, is_monetary: bool) {
        let input = NewWallet {
            id: id.to_string(),
            name: id.to_uppercase(),
            currency_scale: if is_monetary { 100 } else { 1 },
            is_monetary,
        };
        self.admin
            .create_wallet(&ctx(), &AuditContext::system(), input)
            .await
            .unwrap();
    }

    async fn tier(&self, id: &str) {
        let input = NewTier {
            id: id.to_string(),
            name: "Gold".to_string(),
            description: None,
        };
        self.admin
            .create_tier(&ctx(), &AuditContext::system(), input)
            .await
            .unwrap();
    }

    async fn user(&self, id: &str, tier_id: Option<&str>) {
        let input = NewUser {
            id: id.to_string(),
            tier_id: tier_id.map(str::to_string),
            is_active: true,
        };
        self.admin
            .create_user(&ctx(), &AuditContext::system(), input)
            .await
            .unwrap();
    }

    async fn account(&self, wallet_id: &str, user_id: &str) -> Account {
        self.accounts
            .create_account(&ctx(), wallet_id, user_id)
            .await
            .unwrap()
    }

    async fn reload(&self, wallet_id: &str, account_id: &str) -> Account {
        self.accounts
            .get_account(&ctx(), wallet_id, AccountLookup::ById(account_id.to_string()))
            .await
            .unwrap()
    }

    async fn deposit(&self, wallet_id: &str, account_id: &str, amount: i64) {
        self.engine
            .post(&ctx(), wallet_id, post(account_id, TransactionKind::Deposit, amount))
            .await
            .unwrap();
    }
}

fn ctx() -> RequestContext {
    RequestContext::system()
}

fn post(account_id: &str, kind: TransactionKind, amount: i64) -> PostRequest {
    PostRequest::new(account_id, kind, Amount::new(amount).unwrap())
}

/// `points` wallet with user `u1` and an empty account
async fn points_ledger() -> (Ledger, Account) {
    let ledger = Ledger::new();
    ledger.wallet("points", false).await;
    ledger.user("u1", None).await;
    let account = ledger.account("points", "u1").await;
    (ledger, account)
}

/// `cash` (monetary) and `points` wallets, gold tier at 2.5 points per unit
async fn exchange_ledger() -> Ledger {
    let ledger = Ledger::new();
    ledger.wallet("cash", true).await;
    ledger.wallet("points", false).await;
    ledger.tier("gold").await;
    ledger.user("u1", Some("gold")).await;
    let rate = NewExchangeRate {
        from_wallet_id: "cash".to_string(),
        to_wallet_id: "points".to_string(),
        tier_id: "gold".to_string(),
        rate: Decimal::from_str("2.5").unwrap(),
    };
    ledger
        .admin
        .create_exchange_rate(&ctx(), &AuditContext::system(), rate)
        .await
        .unwrap();
    ledger
}

fn exchange_request(amount: i64) -> ExchangeRequest {
    ExchangeRequest {
        from_wallet_id: "cash".to_string(),
        to_wallet_id: "points".to_string(),
        user_id: "u1".to_string(),
        amount: Amount::new(amount).unwrap(),
    }
}

// ============================================================================
// Postings
// ============================================================================

#[tokio::test]
async fn qa_deposit_then_withdraw() {
    let (ledger, account) = points_ledger().await;

    let first = ledger
        .engine
        .post(
            &ctx(),
            "points",
            post(&account.id, TransactionKind::Deposit, 500).expecting(Version::new(0)),
        )
        .await
        .unwrap();
    assert_eq!(first.account.balance.value(), 500);
    assert_eq!(first.account.version, Version::new(1));
    assert_eq!(first.transaction.tx_type, TransactionType::Credit);

    let second = ledger
        .engine
        .post(
            &ctx(),
            "points",
            post(&account.id, TransactionKind::Withdraw, 200).expecting(Version::new(1)),
        )
        .await
        .unwrap();
    assert_eq!(second.account.balance.value(), 300);
    assert_eq!(second.account.version, Version::new(2));
    assert_eq!(second.transaction.previous_balance.value(), 500);
    assert_eq!(second.transaction.new_balance.value(), 300);
    assert!(second.transaction.id > first.transaction.id);

    let stored = ledger.reload("points", &account.id).await;
    assert_eq!(stored.balance.value(), 300);
    assert_eq!(stored.version, Version::new(2));
}

#[tokio::test]
async fn qa_concurrent_double_spend_has_one_winner() {
    let (ledger, account) = points_ledger().await;
    ledger.deposit("points", &account.id, 100).await;
    let version = ledger.reload("points", &account.id).await.version;

    let engine = &ledger.engine;
    let attempts = (0..2).map(|_| {
        let req = post(&account.id, TransactionKind::Withdraw, 80).expecting(version);
        async move { engine.post(&ctx(), "points", req).await }
    });
    let results = futures::future::join_all(attempts).await;

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let losers: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(winners.len(), 1, "exactly one withdrawal must commit");
    assert_eq!(losers.len(), 1);
    assert_eq!(winners[0].account.balance.value(), 20);
    assert_eq!(winners[0].account.version, version.next());
    assert_eq!(losers[0].code(), "CONFLICT");
    assert_eq!(losers[0].http_status(), 409);
}

#[tokio::test]
async fn qa_debit_boundaries() {
    let (ledger, account) = points_ledger().await;
    ledger.deposit("points", &account.id, 100).await;

    let err = ledger
        .engine
        .post(&ctx(), "points", post(&account.id, TransactionKind::Purchase, 101))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_BALANCE");

    let outcome = ledger
        .engine
        .post(&ctx(), "points", post(&account.id, TransactionKind::Purchase, 100))
        .await
        .unwrap();
    assert!(outcome.account.balance.is_zero(), "debit of the full balance leaves zero");

    // The failed attempt wrote nothing
    let txs = ledger
        .engine
        .list(&ctx(), "points", Some(account.id.as_str()), Page::default())
        .await
        .unwrap();
    assert_eq!(txs.len(), 2);
}

#[tokio::test]
async fn qa_reference_replay_returns_original() {
    let (ledger, account) = points_ledger().await;

    let req = post(&account.id, TransactionKind::Refund, 50).with_reference("order-42");
    let first = ledger.engine.post(&ctx(), "points", req.clone()).await.unwrap();
    let second = ledger.engine.post(&ctx(), "points", req).await.unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.transaction.id, second.transaction.id);

    let stored = ledger.reload("points", &account.id).await;
    assert_eq!(stored.balance.value(), 50, "state changes only once");
    assert_eq!(stored.version, Version::new(1));

    // Same reference under another kind is a different posting
    let refund_as_deposit = post(&account.id, TransactionKind::Deposit, 50).with_reference("order-42");
    let third = ledger
        .engine
        .post(&ctx(), "points", refund_as_deposit)
        .await
        .unwrap();
    assert!(!third.replayed);
}

#[tokio::test]
async fn qa_post_rejects_exchange_kind_and_unknown_wallet() {
    let (ledger, account) = points_ledger().await;

    let err = ledger
        .engine
        .post(&ctx(), "points", post(&account.id, TransactionKind::Exchange, 5))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    let err = ledger
        .engine
        .post(&ctx(), "gems", post(&account.id, TransactionKind::Deposit, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "wallet", .. }));
}

#[tokio::test]
async fn qa_post_records_actor() {
    let (ledger, account) = points_ledger().await;
    let req = post(&account.id, TransactionKind::Deposit, 10)
        .by(ActorType::Backoffice, Some("ops-1".to_string()));
    let outcome = ledger.engine.post(&ctx(), "points", req).await.unwrap();
    assert_eq!(outcome.transaction.actor_type, ActorType::Backoffice);
    assert_eq!(outcome.transaction.actor_id.as_deref(), Some("ops-1"));
}

// ============================================================================
// Accounts
// ============================================================================

#[tokio::test]
async fn qa_account_lifecycle() {
    let (ledger, account) = points_ledger().await;

    let err = ledger
        .accounts
        .create_account(&ctx(), "points", "u1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT", "one account per user and wallet");

    ledger.deposit("points", &account.id, 5).await;
    let err = ledger
        .accounts
        .delete_account(&ctx(), "points", &account.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT", "non-zero balance cannot be closed");

    ledger
        .engine
        .post(&ctx(), "points", post(&account.id, TransactionKind::Withdraw, 5))
        .await
        .unwrap();
    let closed = ledger
        .accounts
        .delete_account(&ctx(), "points", &account.id)
        .await
        .unwrap();
    assert!(!closed.is_active);

    let err = ledger
        .engine
        .post(&ctx(), "points", post(&account.id, TransactionKind::Deposit, 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT", "inactive accounts take no postings");
}

#[tokio::test]
async fn qa_account_requires_known_user() {
    let (ledger, _) = points_ledger().await;
    let err = ledger
        .accounts
        .create_account(&ctx(), "points", "ghost")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn qa_accounts_sum() {
    let (ledger, a1) = points_ledger().await;
    ledger.user("u2", None).await;
    let a2 = ledger.account("points", "u2").await;
    ledger.deposit("points", &a1.id, 70).await;
    ledger.deposit("points", &a2.id, 30).await;

    let sum = ledger
        .accounts
        .wallet_accounts_sum(&ctx(), "points")
        .await
        .unwrap();
    assert_eq!(sum, 100);
}

// ============================================================================
// Integrity
// ============================================================================

#[tokio::test]
async fn qa_integrity_after_postings() {
    let (ledger, account) = points_ledger().await;
    ledger.deposit("points", &account.id, 500).await;
    ledger
        .engine
        .post(&ctx(), "points", post(&account.id, TransactionKind::Withdraw, 200))
        .await
        .unwrap();

    let report = ledger
        .integrity
        .check_wallet_integrity(&ctx(), "points")
        .await
        .unwrap();
    assert_eq!(report.accounts_sum, 300);
    assert_eq!(report.transactions_sum, 300);
    assert_eq!(report.diff, 0);
}

#[tokio::test]
async fn qa_integrity_reports_seeded_drift() {
    let (ledger, account) = points_ledger().await;
    ledger.deposit("points", &account.id, 10).await;
    ledger.store.seed_balance("points", &account.id, 25).await.unwrap();

    let report = ledger
        .integrity
        .check_wallet_integrity(&ctx(), "points")
        .await
        .unwrap();
    assert_eq!(report.diff, 15);
    assert!(!report.is_consistent());
}

#[tokio::test]
async fn qa_integrity_sums_past_i64_range() {
    let (ledger, a1) = points_ledger().await;
    ledger.user("u2", None).await;
    let a2 = ledger.account("points", "u2").await;
    ledger.deposit("points", &a1.id, i64::MAX).await;
    ledger.deposit("points", &a2.id, 1).await;

    let report = ledger
        .integrity
        .check_wallet_integrity(&ctx(), "points")
        .await
        .unwrap();
    let total = i128::from(i64::MAX) + 1;
    assert_eq!(report.accounts_sum, total);
    assert_eq!(report.transactions_sum, total);
    assert_eq!(report.diff, 0);

    let sum = ledger
        .accounts
        .wallet_accounts_sum(&ctx(), "points")
        .await
        .unwrap();
    assert_eq!(sum, total);
}

// ============================================================================
// Exchange
// ============================================================================

#[tokio::test]
async fn qa_exchange_cash_to_points() {
    let ledger = exchange_ledger().await;
    let cash = ledger.account("cash", "u1").await;
    ledger.deposit("cash", &cash.id, 1000).await;

    let outcome = ledger
        .exchange
        .exchange(&ctx(), exchange_request(400))
        .await
        .unwrap();

    assert_eq!(outcome.from.tx_type, TransactionType::Debit);
    assert_eq!(outcome.to.tx_type, TransactionType::Credit);
    assert_eq!(outcome.from.amount.value(), 400);
    assert_eq!(outcome.to.amount.value(), 10, "(400 / 100) * 2.5");
    assert_eq!(outcome.from.created_at, outcome.to.created_at);
    assert_eq!(outcome.from.reference(), outcome.to.reference());
    assert_eq!(outcome.from_account.balance.value(), 600);
    assert_eq!(outcome.to_account.balance.value(), 10);

    // Destination account was opened by the exchange
    let points = ledger
        .accounts
        .get_account(&ctx(), "points", AccountLookup::ByUser("u1".to_string()))
        .await
        .unwrap();
    assert_eq!(points.balance.value(), 10);
    assert_eq!(points.version, Version::new(1));

    for wallet in ["cash", "points"] {
        let report = ledger
            .integrity
            .check_wallet_integrity(&ctx(), wallet)
            .await
            .unwrap();
        assert_eq!(report.diff, 0, "{} must stay consistent", wallet);
    }
}

#[tokio::test]
async fn qa_exchange_failure_writes_nothing() {
    let ledger = exchange_ledger().await;
    let cash = ledger.account("cash", "u1").await;
    ledger.deposit("cash", &cash.id, 300).await;

    let err = ledger
        .exchange
        .exchange(&ctx(), exchange_request(400))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_BALANCE");

    // 1 cent converts to 0.025 points, which rounds to nothing
    let err = ledger
        .exchange
        .exchange(&ctx(), exchange_request(1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "UNPROCESSABLE_ENTITY");

    let stored = ledger.reload("cash", &cash.id).await;
    assert_eq!(stored.balance.value(), 300);
    assert_eq!(stored.version, Version::new(1));
    let points = ledger
        .store
        .find_account("points", &AccountLookup::ByUser("u1".to_string()))
        .await
        .unwrap();
    assert!(points.is_none(), "no leg may persist on failure");
}

/// Either side moving after the pre-read aborts the whole exchange
#[tokio::test]
async fn qa_exchange_stale_version_writes_nothing() {
    let ledger = exchange_ledger().await;
    let cash = ledger.account("cash", "u1").await;
    let points = ledger.account("points", "u1").await;
    ledger.deposit("cash", &cash.id, 1000).await;
    ledger.deposit("points", &points.id, 5).await;

    let plan = |from_version: i64, to_version: i64| ExchangePlan {
        exchange_id: ulid::Ulid::new().to_string(),
        from_wallet_id: "cash".to_string(),
        to_wallet_id: "points".to_string(),
        user_id: "u1".to_string(),
        amount: Amount::new(400).unwrap(),
        credited: Amount::new(10).unwrap(),
        rate: Decimal::from_str("2.5").unwrap(),
        from_version: Version::new(from_version),
        to_version: Some(Version::new(to_version)),
        actor: Actor::system(),
    };

    for stale in [plan(0, 1), plan(1, 0)] {
        let err = ledger.store.exchange(&ctx(), &stale).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(err.reason().as_deref(), Some("VERSION_MISMATCH"));
    }

    let cash_now = ledger.reload("cash", &cash.id).await;
    assert_eq!(cash_now.balance.value(), 1000);
    assert_eq!(cash_now.version, Version::new(1));
    let points_now = ledger.reload("points", &points.id).await;
    assert_eq!(points_now.balance.value(), 5);
    assert_eq!(points_now.version, Version::new(1));

    for wallet in ["cash", "points"] {
        let txs = ledger
            .store
            .list_transactions(wallet, None, Page::default())
            .await
            .unwrap();
        assert_eq!(txs.len(), 1, "{} keeps only its deposit", wallet);
    }

    // The current versions go through
    ledger.store.exchange(&ctx(), &plan(1, 1)).await.unwrap();
    assert_eq!(ledger.reload("points", &points.id).await.balance.value(), 15);
}

#[tokio::test]
async fn qa_exchange_without_rate_or_tier() {
    let ledger = exchange_ledger().await;
    ledger.user("u2", None).await;
    let cash = ledger.account("cash", "u2").await;
    ledger.deposit("cash", &cash.id, 1000).await;

    let mut req = exchange_request(400);
    req.user_id = "u2".to_string();
    let err = ledger.exchange.exchange(&ctx(), req).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND", "a user without a tier has no rate");

    let mut reverse = exchange_request(10);
    std::mem::swap(&mut reverse.from_wallet_id, &mut reverse.to_wallet_id);
    let err = ledger.exchange.exchange(&ctx(), reverse).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND", "rates are directional");
}

#[tokio::test]
async fn qa_exchange_same_wallet_rejected() {
    let ledger = exchange_ledger().await;
    let mut req = exchange_request(10);
    req.to_wallet_id = "cash".to_string();
    let err = ledger.exchange.exchange(&ctx(), req).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
}

// ============================================================================
// Audit
// ============================================================================

#[tokio::test]
async fn qa_tier_create_is_audited_once() {
    let ledger = Ledger::new();
    ledger.tier("gold").await;

    let rows = ledger
        .admin
        .audit_for_record(&ctx(), "tiers", "gold")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].operation, AuditOperation::Create);
    let new_record = rows[0].new_record.as_ref().unwrap();
    assert_eq!(new_record["id"], "gold");
    assert_eq!(new_record["name"], "Gold");
    assert!(rows[0].old_record.is_none());
}

#[tokio::test]
async fn qa_every_governed_write_has_one_audit_row() {
    let ledger = Ledger::new();
    let audit = AuditContext::system().with_remarks(Some("cleanup".to_string()));
    ledger.tier("gold").await;
    ledger
        .admin
        .update_tier(
            &ctx(),
            &audit,
            "gold",
            UpdateTier {
                name: "Gold+".to_string(),
                description: Some("top".to_string()),
            },
        )
        .await
        .unwrap();
    ledger.admin.remove::<Tier>(&ctx(), &audit, "gold").await.unwrap();

    let rows = ledger
        .admin
        .audit_for_record(&ctx(), "tiers", "gold")
        .await
        .unwrap();
    let ops: Vec<_> = rows.iter().map(|r| r.operation).collect();
    assert_eq!(
        ops,
        vec![AuditOperation::Create, AuditOperation::Update, AuditOperation::Delete]
    );
    assert_eq!(rows[1].old_record.as_ref().unwrap()["name"], "Gold");
    assert_eq!(rows[1].new_record.as_ref().unwrap()["name"], "Gold+");
    assert_eq!(rows[2].remarks.as_deref(), Some("cleanup"));
    assert_eq!(rows[2].old_record.as_ref().unwrap()["name"], "Gold+");
    assert!(rows[2].new_record.is_none());

    let err = ledger.admin.get::<Tier>(&ctx(), "gold").await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

/// Two writers start from the same read; the second audit row must show
/// the first writer's row as the state it replaced
#[tokio::test]
async fn qa_update_audit_records_replaced_row() {
    let ledger = Ledger::new();
    ledger.tier("gold").await;
    let read = ledger.admin.get::<Tier>(&ctx(), "gold").await.unwrap();

    ledger
        .admin
        .update_tier(
            &ctx(),
            &AuditContext::system(),
            "gold",
            UpdateTier {
                name: "Gold II".to_string(),
                description: None,
            },
        )
        .await
        .unwrap();

    let late = Tier {
        name: "Platinum".to_string(),
        ..read
    }
    .into_record();
    let entry = NewAudit::new(&AuditContext::system(), "tiers", "gold", AuditOperation::Update)
        .new_state(late.snapshot().unwrap());
    let row = ledger
        .store
        .apply_change(GovernedChange::Update(late), entry)
        .await
        .unwrap();

    assert_eq!(row.old_record.as_ref().unwrap()["name"], "Gold II");
    assert_eq!(row.new_record.as_ref().unwrap()["name"], "Platinum");
}

#[tokio::test]
async fn qa_failed_write_leaves_no_audit_row() {
    let ledger = Ledger::new();
    ledger.tier("gold").await;
    let err = ledger
        .admin
        .create_tier(
            &ctx(),
            &AuditContext::system(),
            NewTier {
                id: "gold".to_string(),
                name: "Again".to_string(),
                description: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    let rows = ledger.admin.list_audit(&ctx(), Page::default()).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn qa_referenced_tier_cannot_be_deleted() {
    let ledger = exchange_ledger().await;
    let err = ledger
        .admin
        .remove::<Tier>(&ctx(), &AuditContext::system(), "gold")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
}

// ============================================================================
// Program dispatch
// ============================================================================

async fn deposit_trigger(ledger: &Ledger) {
    let trigger = NewTrigger {
        slug: "points-earned".to_string(),
        name: "Points earned".to_string(),
        description: None,
        wallet_id: Some("points".to_string()),
        transaction_type: TransactionType::Credit,
        is_active: true,
    };
    ledger
        .admin
        .create_trigger(&ctx(), &AuditContext::system(), trigger)
        .await
        .unwrap();
}

#[tokio::test]
async fn qa_committed_credit_reaches_trigger_topic() {
    let publisher = Arc::new(MemoryPublisher::new());
    let events = publisher.clone();
    let ledger = Ledger::with_dispatcher(|store| ProgramDispatcher::new(store, publisher, "ledger"));
    ledger.wallet("points", false).await;
    ledger.user("u1", None).await;
    let account = ledger.account("points", "u1").await;
    deposit_trigger(&ledger).await;

    let outcome = ledger
        .engine
        .post(&ctx(), "points", post(&account.id, TransactionKind::Deposit, 40))
        .await
        .unwrap();

    // Delivery runs after the commit, in the background
    let published = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let published = events.published().await;
            if !published.is_empty() {
                return published;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("event was never published");

    assert_eq!(published.len(), 1);
    let (topic, payload) = &published[0];
    assert_eq!(topic, "ledger.points-earned");
    assert_eq!(payload["walletId"], "points");
    assert_eq!(payload["accountId"], account.id.as_str());
    assert_eq!(payload["userId"], "u1");
    assert_eq!(payload["txId"], outcome.transaction.id);
    assert_eq!(payload["kind"], "DEPOSIT");
    assert_eq!(payload["amount"], 40);
}

#[tokio::test]
async fn qa_debit_does_not_match_credit_trigger() {
    let (ledger, account) = points_ledger().await;
    deposit_trigger(&ledger).await;
    ledger.deposit("points", &account.id, 10).await;

    let publisher = Arc::new(MemoryPublisher::new());
    let dispatcher = ProgramDispatcher::new(ledger.store.clone(), publisher.clone(), "ledger");
    let debit = ledger
        .engine
        .post(&ctx(), "points", post(&account.id, TransactionKind::Purchase, 5))
        .await
        .unwrap();
    let report = dispatcher
        .dispatch("points", &debit.account, &debit.transaction)
        .await
        .unwrap();
    assert!(report.delivered.is_empty());
    assert!(report.dead_lettered.is_empty());
    assert!(publisher.published().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn qa_undeliverable_event_is_dead_lettered() {
    let ledger = Ledger::new();
    ledger.wallet("points", false).await;
    ledger.user("u1", None).await;
    let account = ledger.account("points", "u1").await;
    deposit_trigger(&ledger).await;

    let publisher = Arc::new(MemoryPublisher::failing(u32::MAX));
    let backoff = BackoffPolicy {
        base: Duration::from_millis(10),
        factor: 2,
        cap: Duration::from_millis(100),
        max_attempts: 3,
    };
    let dispatcher =
        ProgramDispatcher::new(ledger.store.clone(), publisher.clone(), "").with_backoff(backoff);

    let outcome = ledger
        .engine
        .post(&ctx(), "points", post(&account.id, TransactionKind::Deposit, 40))
        .await
        .unwrap();
    let report = dispatcher
        .dispatch("points", &outcome.account, &outcome.transaction)
        .await
        .unwrap();
    assert_eq!(report.dead_lettered, vec!["points-earned".to_string()]);
    assert!(publisher.published().await.is_empty());

    // The posting itself stays committed
    assert_eq!(ledger.reload("points", &account.id).await.balance.value(), 40);

    let letters = ledger
        .admin
        .list_dead_letters(&ctx(), Page::default())
        .await
        .unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].topic, "points-earned");
    assert_eq!(letters[0].attempts, 3);
    assert_eq!(letters[0].payload["txId"], outcome.transaction.id);
}

#[tokio::test(start_paused = true)]
async fn qa_transient_publish_failure_is_retried() {
    let ledger = Ledger::new();
    ledger.wallet("points", false).await;
    ledger.user("u1", None).await;
    let account = ledger.account("points", "u1").await;
    deposit_trigger(&ledger).await;

    let publisher = Arc::new(MemoryPublisher::failing(2));
    let dispatcher = ProgramDispatcher::new(ledger.store.clone(), publisher.clone(), "ledger");
    let outcome = ledger
        .engine
        .post(&ctx(), "points", post(&account.id, TransactionKind::Deposit, 1))
        .await
        .unwrap();
    let report = dispatcher
        .dispatch("points", &outcome.account, &outcome.transaction)
        .await
        .unwrap();
    assert_eq!(report.delivered.len(), 1);
    assert_eq!(publisher.published().await.len(), 1);
}

/// Engine wired to a dispatcher the test keeps a handle on
fn dispatching_engine(ledger: &mut Ledger, publisher: Arc<MemoryPublisher>) -> Arc<ProgramDispatcher> {
    let shared: Arc<dyn LedgerStore> = ledger.store.clone();
    let dispatcher = Arc::new(ProgramDispatcher::new(shared.clone(), publisher, "ledger"));
    ledger.engine = TransactionEngine::new(shared).with_dispatcher(dispatcher.clone());
    dispatcher
}

#[tokio::test(start_paused = true)]
async fn qa_shutdown_dead_letters_undelivered_event() {
    let mut ledger = Ledger::new();
    ledger.wallet("points", false).await;
    ledger.user("u1", None).await;
    let account = ledger.account("points", "u1").await;
    deposit_trigger(&ledger).await;

    let publisher = Arc::new(MemoryPublisher::failing(u32::MAX));
    let dispatcher = dispatching_engine(&mut ledger, publisher.clone());

    let outcome = ledger
        .engine
        .post(&ctx(), "points", post(&account.id, TransactionKind::Deposit, 40))
        .await
        .unwrap();

    // First retry waits 100ms, longer than the grace period
    let drained = dispatcher.drain(Duration::from_millis(50)).await;
    assert_eq!(drained.pending, 1);
    assert_eq!(dispatcher.in_flight(), 0);
    assert!(publisher.published().await.is_empty());

    let letters = ledger
        .admin
        .list_dead_letters(&ctx(), Page::default())
        .await
        .unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].topic, "ledger.points-earned");
    assert_eq!(letters[0].attempts, 1);
    assert_eq!(letters[0].payload["txId"], outcome.transaction.id);
}

#[tokio::test(start_paused = true)]
async fn qa_shutdown_waits_for_delivery_within_grace() {
    let mut ledger = Ledger::new();
    ledger.wallet("points", false).await;
    ledger.user("u1", None).await;
    let account = ledger.account("points", "u1").await;
    deposit_trigger(&ledger).await;

    let publisher = Arc::new(MemoryPublisher::failing(2));
    let dispatcher = dispatching_engine(&mut ledger, publisher.clone());

    ledger
        .engine
        .post(&ctx(), "points", post(&account.id, TransactionKind::Deposit, 40))
        .await
        .unwrap();

    let drained = dispatcher.drain(Duration::from_secs(5)).await;
    assert_eq!(drained.pending, 0);
    assert_eq!(publisher.published().await.len(), 1);
    assert!(
        ledger
            .admin
            .list_dead_letters(&ctx(), Page::default())
            .await
            .unwrap()
            .is_empty()
    );
}
