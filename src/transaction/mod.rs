//! Ledger transactions: types, the posting engine and its retry policy

pub mod engine;
pub mod retry;
pub mod types;

pub use engine::{Movement, PostingPlan, TransactionEngine, plan_movement, plan_posting};
pub use retry::RetryPolicy;
pub use types::{PostRequest, Transaction, TransactionKind, TransactionType, build_metadata};
