//! In-process ledger store
//!
//! One mutex over the whole state serialises every unit of work, which is
//! the strongest isolation the PostgreSQL store can offer. All checks run
//! before the first mutation, so a failed operation leaves no trace.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{LedgerStore, LedgerSums, Page, PostOutcome};
use crate::account::{Account, AccountLookup};
use crate::audit::{Audit, NewAudit};
use crate::context::RequestContext;
use crate::dispatcher::dead_letter::{DeadLetter, NewDeadLetter};
use crate::error::{LedgerError, LedgerResult};
use crate::exchange::{ExchangeOutcome, ExchangePlan};
use crate::reference::governed::{GovernedChange, GovernedKind, GovernedRecord};
use crate::reference::models::{ExchangeRate, Trigger};
use crate::transaction::engine::{is_replay_of, plan_movement, plan_posting};
use crate::transaction::{Transaction, TransactionType};

#[derive(Default)]
struct WalletLedger {
    accounts: Vec<Account>,
    transactions: Vec<Transaction>,
    last_tx_id: i64,
}

impl WalletLedger {
    fn next_tx_id(&mut self) -> i64 {
        self.last_tx_id += 1;
        self.last_tx_id
    }

    fn account_index(&self, account_id: &str) -> LedgerResult<usize> {
        self.accounts
            .iter()
            .position(|a| a.id == account_id)
            .ok_or_else(|| LedgerError::not_found("account", account_id))
    }

    fn user_account(&self, user_id: &str) -> Option<usize> {
        self.accounts.iter().position(|a| a.user_id == user_id)
    }
}

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<(GovernedKind, String), GovernedRecord>,
    ledgers: HashMap<String, WalletLedger>,
    audit: Vec<Audit>,
    dead_letters: Vec<DeadLetter>,
}

impl MemoryState {
    fn ledger(&self, wallet_id: &str) -> LedgerResult<&WalletLedger> {
        self.ledgers
            .get(wallet_id)
            .ok_or_else(|| LedgerError::not_found("wallet", wallet_id))
    }

    fn ledger_mut(&mut self, wallet_id: &str) -> LedgerResult<&mut WalletLedger> {
        self.ledgers
            .get_mut(wallet_id)
            .ok_or_else(|| LedgerError::not_found("wallet", wallet_id))
    }

    fn records_of(&self, kind: GovernedKind) -> impl Iterator<Item = &GovernedRecord> {
        self.records
            .range((kind, String::new())..)
            .take_while(move |((k, _), _)| *k == kind)
            .map(|(_, r)| r)
    }

    /// Reason a record cannot be deleted, if any
    fn blocking_reference(&self, kind: GovernedKind, id: &str) -> Option<String> {
        match kind {
            GovernedKind::Wallet => {
                if self.ledgers.get(id).is_some_and(|l| !l.accounts.is_empty()) {
                    return Some(format!("wallet {} has accounts", id));
                }
                let referenced = self.records.values().any(|r| match r {
                    GovernedRecord::ExchangeRate(rate) => {
                        rate.from_wallet_id == id || rate.to_wallet_id == id
                    }
                    GovernedRecord::Trigger(trigger) => trigger.wallet_id.as_deref() == Some(id),
                    _ => false,
                });
                referenced.then(|| format!("wallet {} is referenced by rates or triggers", id))
            }
            GovernedKind::Tier => {
                let referenced = self.records.values().any(|r| match r {
                    GovernedRecord::User(user) => user.tier_id.as_deref() == Some(id),
                    GovernedRecord::ExchangeRate(rate) => rate.tier_id == id,
                    _ => false,
                });
                referenced.then(|| format!("tier {} is referenced by users or rates", id))
            }
            GovernedKind::User => self
                .ledgers
                .values()
                .any(|l| l.accounts.iter().any(|a| a.user_id == id && a.is_active))
                .then(|| format!("user {} has active accounts", id)),
            GovernedKind::Trigger => self
                .records_of(GovernedKind::Program)
                .any(|r| matches!(r, GovernedRecord::Program(p) if p.trigger_id == id))
                .then(|| format!("trigger {} has programs", id)),
            GovernedKind::ExchangeRate | GovernedKind::Program => None,
        }
    }

    /// Uniqueness beyond the primary key
    fn duplicate_of(&self, record: &GovernedRecord) -> Option<String> {
        match record {
            GovernedRecord::ExchangeRate(new) => self
                .records_of(GovernedKind::ExchangeRate)
                .any(|r| {
                    matches!(r, GovernedRecord::ExchangeRate(old)
                        if old.id != new.id
                            && old.from_wallet_id == new.from_wallet_id
                            && old.to_wallet_id == new.to_wallet_id
                            && old.tier_id == new.tier_id)
                })
                .then(|| {
                    format!(
                        "rate {}->{} ({}) already exists",
                        new.from_wallet_id, new.to_wallet_id, new.tier_id
                    )
                }),
            GovernedRecord::Trigger(new) => self
                .records_of(GovernedKind::Trigger)
                .any(|r| matches!(r, GovernedRecord::Trigger(old) if old.id != new.id && old.slug == new.slug))
                .then(|| format!("trigger slug {} already exists", new.slug)),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a balance without a transaction, the way seed data does.
    /// Such balances are outside the integrity invariant.
    pub async fn seed_balance(&self, wallet_id: &str, account_id: &str, balance: i64) -> LedgerResult<()> {
        let mut state = self.state.lock().await;
        let ledger = state.ledger_mut(wallet_id)?;
        let idx = ledger.account_index(account_id)?;
        ledger.accounts[idx].balance = crate::money::Amount::new(balance)
            .map_err(|e| LedgerError::invalid_field("balance", e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn ping(&self) -> LedgerResult<()> {
        Ok(())
    }

    async fn get_record(&self, kind: GovernedKind, id: &str) -> LedgerResult<Option<GovernedRecord>> {
        let state = self.state.lock().await;
        Ok(state.records.get(&(kind, id.to_string())).cloned())
    }

    async fn list_records(&self, kind: GovernedKind, page: Page) -> LedgerResult<Vec<GovernedRecord>> {
        let state = self.state.lock().await;
        let mut rows: Vec<GovernedRecord> = state.records_of(kind).cloned().collect();
        rows.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(a.id()))
        });
        Ok(page.slice(&rows))
    }

    async fn find_exchange_rate(
        &self,
        from_wallet_id: &str,
        to_wallet_id: &str,
        tier_id: &str,
    ) -> LedgerResult<Option<ExchangeRate>> {
        let state = self.state.lock().await;
        Ok(state.records_of(GovernedKind::ExchangeRate).find_map(|r| match r {
            GovernedRecord::ExchangeRate(rate)
                if rate.from_wallet_id == from_wallet_id
                    && rate.to_wallet_id == to_wallet_id
                    && rate.tier_id == tier_id =>
            {
                Some(rate.clone())
            }
            _ => None,
        }))
    }

    async fn matching_triggers(&self, wallet_id: &str, tx_type: TransactionType) -> LedgerResult<Vec<Trigger>> {
        let state = self.state.lock().await;
        Ok(state
            .records_of(GovernedKind::Trigger)
            .filter_map(|r| match r {
                GovernedRecord::Trigger(t) if t.matches(wallet_id, tx_type) => Some(t.clone()),
                _ => None,
            })
            .collect())
    }

    async fn apply_change(&self, change: GovernedChange, mut audit: NewAudit) -> LedgerResult<Audit> {
        let mut state = self.state.lock().await;
        let key = (change.kind(), change.record_id().to_string());

        match change {
            GovernedChange::Create(record) => {
                if state.records.contains_key(&key) {
                    return Err(LedgerError::Duplicate(format!(
                        "{} {} already exists",
                        key.0.entity(),
                        key.1
                    )));
                }
                if let Some(reason) = state.duplicate_of(&record) {
                    return Err(LedgerError::Duplicate(reason));
                }
                if key.0 == GovernedKind::Wallet {
                    state.ledgers.insert(key.1.clone(), WalletLedger::default());
                }
                state.records.insert(key, record);
            }
            GovernedChange::Update(record) => {
                let old = state
                    .records
                    .get(&key)
                    .ok_or_else(|| LedgerError::not_found(key.0.entity(), &key.1))?;
                audit = audit.old(old.snapshot()?);
                if let Some(reason) = state.duplicate_of(&record) {
                    return Err(LedgerError::Duplicate(reason));
                }
                state.records.insert(key, record);
            }
            GovernedChange::Delete(kind, id) => {
                let old = state
                    .records
                    .get(&key)
                    .ok_or_else(|| LedgerError::not_found(kind.entity(), &id))?;
                audit = audit.old(old.snapshot()?);
                if let Some(reason) = state.blocking_reference(kind, &id) {
                    return Err(LedgerError::Conflict(reason));
                }
                if kind == GovernedKind::Wallet {
                    state.ledgers.remove(&id);
                }
                state.records.remove(&key);
            }
        }

        let row = audit.into_audit(state.audit.len() as i64 + 1, Utc::now());
        state.audit.push(row.clone());
        Ok(row)
    }

    async fn audit_for_record(&self, table: &str, record_id: &str) -> LedgerResult<Vec<Audit>> {
        let state = self.state.lock().await;
        Ok(state
            .audit
            .iter()
            .filter(|a| a.table_name == table && a.record_id == record_id)
            .cloned()
            .collect())
    }

    async fn list_audit(&self, page: Page) -> LedgerResult<Vec<Audit>> {
        let state = self.state.lock().await;
        let rows: Vec<Audit> = state.audit.iter().rev().cloned().collect();
        Ok(page.slice(&rows))
    }

    async fn insert_account(&self, account: &Account) -> LedgerResult<Account> {
        let mut state = self.state.lock().await;
        let ledger = state.ledger_mut(&account.wallet_id)?;
        if ledger.user_account(&account.user_id).is_some() {
            return Err(LedgerError::Duplicate(format!(
                "account for user {} in wallet {}",
                account.user_id, account.wallet_id
            )));
        }
        ledger.accounts.push(account.clone());
        Ok(account.clone())
    }

    async fn find_account(&self, wallet_id: &str, lookup: &AccountLookup) -> LedgerResult<Option<Account>> {
        let state = self.state.lock().await;
        let ledger = state.ledger(wallet_id)?;
        Ok(ledger.accounts.iter().find(|a| lookup.matches(a)).cloned())
    }

    async fn list_accounts(&self, wallet_id: &str, page: Page) -> LedgerResult<Vec<Account>> {
        let state = self.state.lock().await;
        let mut rows = state.ledger(wallet_id)?.accounts.clone();
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(page.slice(&rows))
    }

    async fn deactivate_account(
        &self,
        _ctx: &RequestContext,
        wallet_id: &str,
        account_id: &str,
    ) -> LedgerResult<Account> {
        let mut state = self.state.lock().await;
        let ledger = state.ledger_mut(wallet_id)?;
        let idx = ledger.account_index(account_id)?;
        let account = &mut ledger.accounts[idx];
        if !account.is_active {
            return Err(LedgerError::not_found("account", account_id));
        }
        if !account.balance.is_zero() {
            return Err(LedgerError::Conflict(format!(
                "account {} still holds {}",
                account_id, account.balance
            )));
        }
        account.is_active = false;
        account.version = account.version.next();
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn post(
        &self,
        _ctx: &RequestContext,
        wallet_id: &str,
        req: &crate::transaction::PostRequest,
    ) -> LedgerResult<PostOutcome> {
        let mut state = self.state.lock().await;
        let ledger = state.ledger_mut(wallet_id)?;
        let idx = ledger.account_index(&req.account_id)?;

        if let Some(reference) = req.reference.as_deref()
            && let Some(existing) = ledger
                .transactions
                .iter()
                .find(|t| t.account_id == req.account_id && is_replay_of(t, req.kind, reference))
        {
            return Ok(PostOutcome {
                transaction: existing.clone(),
                account: ledger.accounts[idx].clone(),
                replayed: true,
            });
        }

        let plan = plan_posting(&ledger.accounts[idx], req)?;
        let now = Utc::now();
        let tx_id = ledger.next_tx_id();
        let account = &mut ledger.accounts[idx];
        plan.movement.apply_to(account, now);
        let account = account.clone();
        let transaction = plan.movement.into_transaction(
            tx_id,
            &account.id,
            req.actor_type,
            req.actor_id.clone(),
            plan.metadata,
            now,
        );
        ledger.transactions.push(transaction.clone());

        Ok(PostOutcome {
            transaction,
            account,
            replayed: false,
        })
    }

    async fn exchange(&self, _ctx: &RequestContext, plan: &ExchangePlan) -> LedgerResult<ExchangeOutcome> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        // Check both sides before touching either
        let from_ledger = state.ledger(&plan.from_wallet_id)?;
        let mut from_account = from_ledger
            .user_account(&plan.user_id)
            .map(|i| from_ledger.accounts[i].clone())
            .ok_or_else(|| LedgerError::not_found("account", format!("user:{}", plan.user_id)))?;

        let to_ledger = state.ledger(&plan.to_wallet_id)?;
        let existing_to = to_ledger
            .user_account(&plan.user_id)
            .map(|i| to_ledger.accounts[i].clone());
        let to_is_new = existing_to.is_none();
        let mut to_account = existing_to
            .unwrap_or_else(|| Account::open(&plan.to_wallet_id, &plan.user_id, now));

        let debit = plan_movement(&from_account, TransactionType::Debit, plan.amount, Some(plan.from_version))?;
        let credit = plan_movement(&to_account, TransactionType::Credit, plan.credited, plan.to_version)?;

        // Debit leg
        let from_ledger = state.ledger_mut(&plan.from_wallet_id)?;
        let from_tx_id = from_ledger.next_tx_id();
        debit.apply_to(&mut from_account, now);
        let from_tx = debit.into_transaction(
            from_tx_id,
            &from_account.id,
            plan.actor.actor_type,
            plan.actor.actor_id.clone(),
            plan.leg_metadata(&plan.to_wallet_id),
            now,
        );
        let idx = from_ledger.account_index(&from_account.id)?;
        from_ledger.accounts[idx] = from_account.clone();
        from_ledger.transactions.push(from_tx.clone());

        // Credit leg
        let to_ledger = state.ledger_mut(&plan.to_wallet_id)?;
        let to_tx_id = to_ledger.next_tx_id();
        credit.apply_to(&mut to_account, now);
        let to_tx = credit.into_transaction(
            to_tx_id,
            &to_account.id,
            plan.actor.actor_type,
            plan.actor.actor_id.clone(),
            plan.leg_metadata(&plan.from_wallet_id),
            now,
        );
        if to_is_new {
            to_ledger.accounts.push(to_account.clone());
        } else {
            let idx = to_ledger.account_index(&to_account.id)?;
            to_ledger.accounts[idx] = to_account.clone();
        }
        to_ledger.transactions.push(to_tx.clone());

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
        let state = self.state.lock().await;
        let rows: Vec<Transaction> = state
            .ledger(wallet_id)?
            .transactions
            .iter()
            .rev()
            .filter(|t| account_id.is_none_or(|a| t.account_id == a))
            .cloned()
            .collect();
        Ok(page.slice(&rows))
    }

    async fn ledger_sums(&self, wallet_id: &str) -> LedgerResult<LedgerSums> {
        let state = self.state.lock().await;
        let ledger = state.ledger(wallet_id)?;
        Ok(LedgerSums {
            accounts_sum: ledger.accounts.iter().map(|a| i128::from(a.balance.value())).sum(),
            transactions_sum: ledger
                .transactions
                .iter()
                .map(|t| i128::from(t.tx_type.signed(t.amount)))
                .sum(),
        })
    }

    async fn record_dead_letter(&self, letter: NewDeadLetter) -> LedgerResult<DeadLetter> {
        let mut state = self.state.lock().await;
        let row = letter.into_dead_letter(state.dead_letters.len() as i64 + 1, Utc::now());
        state.dead_letters.push(row.clone());
        Ok(row)
    }

    async fn list_dead_letters(&self, page: Page) -> LedgerResult<Vec<DeadLetter>> {
        let state = self.state.lock().await;
        let rows: Vec<DeadLetter> = state.dead_letters.iter().rev().cloned().collect();
        Ok(page.slice(&rows))
    }
}
