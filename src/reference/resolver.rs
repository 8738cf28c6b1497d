//! Reference resolver
//!
//! Loads wallets, users, tiers and exchange rates by id. No caching: every
//! call re-reads the store, so admin changes are visible to the next request.

use std::sync::Arc;

use super::governed::Governed;
use super::models::{ExchangeRate, Program, Tier, Trigger, User, Wallet};
use crate::error::{LedgerError, LedgerResult};
use crate::store::LedgerStore;

#[derive(Clone)]
pub struct ReferenceResolver {
    store: Arc<dyn LedgerStore>,
}

impl ReferenceResolver {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Typed fetch; `NOT_FOUND` when absent
    pub async fn get<T: Governed>(&self, id: &str) -> LedgerResult<T> {
        match self.store.get_record(T::KIND, id).await? {
            Some(record) => T::from_record(record),
            None => Err(LedgerError::not_found(T::KIND.entity(), id)),
        }
    }

    /// Typed fetch returning `None` when absent
    pub async fn find<T: Governed>(&self, id: &str) -> LedgerResult<Option<T>> {
        self.store
            .get_record(T::KIND, id)
            .await?
            .map(T::from_record)
            .transpose()
    }

    pub async fn wallet(&self, id: &str) -> LedgerResult<Wallet> {
        self.get(id).await
    }

    pub async fn user(&self, id: &str) -> LedgerResult<User> {
        self.get(id).await
    }

    pub async fn tier(&self, id: &str) -> LedgerResult<Tier> {
        self.get(id).await
    }

    pub async fn trigger(&self, id: &str) -> LedgerResult<Trigger> {
        self.get(id).await
    }

    pub async fn program(&self, id: &str) -> LedgerResult<Program> {
        self.get(id).await
    }

    /// Rate for `(from, to, tier)`
    pub async fn exchange_rate(
        &self,
        from_wallet_id: &str,
        to_wallet_id: &str,
        tier_id: &str,
    ) -> LedgerResult<ExchangeRate> {
        self.store
            .find_exchange_rate(from_wallet_id, to_wallet_id, tier_id)
            .await?
            .ok_or_else(|| {
                LedgerError::not_found(
                    "exchange_rate",
                    format!("{}->{} ({})", from_wallet_id, to_wallet_id, tier_id),
                )
            })
    }
}
