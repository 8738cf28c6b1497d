//! Wallet accounts
//!
//! One account per user per wallet, stored in the wallet's namespace.

pub mod models;
pub mod service;

pub use models::{Account, AccountLookup};
pub use service::AccountService;
