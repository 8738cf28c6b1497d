//! Wallet integrity check
//!
//! `diff = Σ balance - (Σ CREDIT - Σ DEBIT)` must be zero whenever no
//! transaction is in flight. A non-zero diff is logged at ERROR.

use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use crate::context::RequestContext;
use crate::error::LedgerResult;
use crate::reference::ReferenceResolver;
use crate::store::{LedgerStore, LedgerSums};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub accounts_sum: i128,
    pub transactions_sum: i128,
    pub diff: i128,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.diff == 0
    }
}

impl From<LedgerSums> for IntegrityReport {
    fn from(sums: LedgerSums) -> Self {
        Self {
            accounts_sum: sums.accounts_sum,
            transactions_sum: sums.transactions_sum,
            diff: sums.accounts_sum - sums.transactions_sum,
        }
    }
}

pub struct IntegrityChecker {
    store: Arc<dyn LedgerStore>,
    resolver: ReferenceResolver,
}

impl IntegrityChecker {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            resolver: ReferenceResolver::new(store.clone()),
            store,
        }
    }

    pub async fn check_wallet_integrity(
        &self,
        ctx: &RequestContext,
        wallet_id: &str,
    ) -> LedgerResult<IntegrityReport> {
        let report: IntegrityReport = ctx
            .run("check_integrity", async {
                let wallet = self.resolver.wallet(wallet_id).await?;
                self.store.ledger_sums(&wallet.id).await
            })
            .await?
            .into();

        if report.is_consistent() {
            tracing::info!(
                wallet_id,
                accounts_sum = report.accounts_sum,
                "Integrity check passed"
            );
        } else {
            tracing::error!(
                wallet_id,
                accounts_sum = report.accounts_sum,
                transactions_sum = report.transactions_sum,
                diff = report.diff,
                "Integrity check failed: balances disagree with the transaction log"
            );
        }
        Ok(report)
    }
}
