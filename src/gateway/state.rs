use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::account::AccountService;
use crate::dispatcher::ProgramDispatcher;
use crate::exchange::ExchangeEngine;
use crate::integrity::IntegrityChecker;
use crate::reference::ReferenceAdmin;
use crate::store::LedgerStore;
use crate::transaction::TransactionEngine;

/// Shared gateway state
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub accounts: AccountService,
    pub transactions: TransactionEngine,
    pub exchange: ExchangeEngine,
    pub integrity: IntegrityChecker,
    pub admin: ReferenceAdmin,
    /// Drained at shutdown when present
    pub dispatcher: Option<Arc<ProgramDispatcher>>,
    /// HS256 secret for bearer tokens
    pub jwt_secret: String,
    /// Deadline budget given to each request
    pub request_timeout: Duration,
    in_flight: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        dispatcher: Option<Arc<ProgramDispatcher>>,
        jwt_secret: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        let mut transactions = TransactionEngine::new(store.clone());
        let mut exchange = ExchangeEngine::new(store.clone());
        if let Some(dispatcher) = &dispatcher {
            transactions = transactions.with_dispatcher(dispatcher.clone());
            exchange = exchange.with_dispatcher(dispatcher.clone());
        }
        Self {
            accounts: AccountService::new(store.clone()),
            integrity: IntegrityChecker::new(store.clone()),
            admin: ReferenceAdmin::new(store.clone()),
            transactions,
            exchange,
            dispatcher,
            store,
            jwt_secret: jwt_secret.into(),
            request_timeout,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter handle shared with the shutdown logic
    pub fn in_flight(&self) -> Arc<AtomicUsize> {
        self.in_flight.clone()
    }

    /// Count a request until the guard drops
    pub fn track(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(self.in_flight.clone())
    }
}

pub struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
