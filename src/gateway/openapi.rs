//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`
//!
//! Governed CRUD routes are generic handlers and are documented through
//! their payload schemas only.

use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::account::Account;
use crate::audit::{Audit, AuditOperation};
use crate::context::ActorType;
use crate::dispatcher::DeadLetter;
use crate::exchange::{ExchangeRequest, ExchangeResult};
use crate::gateway::handlers::HealthResponse;
use crate::gateway::types::{
    AppExchangeBody, CreateAccountBody, ErrorBody, ErrorResponse, PostTransactionBody,
};
use crate::integrity::IntegrityReport;
use crate::reference::admin::{
    NewExchangeRate, NewProgram, NewTier, NewTrigger, NewUser, NewWallet, UpdateExchangeRate,
    UpdateProgram, UpdateTier, UpdateTrigger, UpdateUser, UpdateWallet,
};
use crate::reference::models::{ExchangeRate, Program, Tier, Trigger, User, Wallet};
use crate::transaction::{Transaction, TransactionKind, TransactionType};

/// HS256 bearer token carrying `{sub, actor_type, exp}`
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_jwt",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Wallet Ledger API",
        version = "1.0.0",
        description = "Multi-wallet ledger: accounts, postings, cross-wallet exchange, integrity checks and audited reference data."
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::health::health_check,
        crate::gateway::handlers::ledger::create_account,
        crate::gateway::handlers::ledger::list_accounts,
        crate::gateway::handlers::ledger::accounts_sum,
        crate::gateway::handlers::ledger::get_account,
        crate::gateway::handlers::ledger::delete_account,
        crate::gateway::handlers::ledger::post_transaction,
        crate::gateway::handlers::ledger::list_transactions,
        crate::gateway::handlers::ledger::exchange,
        crate::gateway::handlers::ledger::check_integrity,
        crate::gateway::handlers::audit::list_audit,
        crate::gateway::handlers::audit::audit_for_record,
        crate::gateway::handlers::audit::list_dead_letters,
        crate::gateway::handlers::app::my_account,
        crate::gateway::handlers::app::my_transactions,
        crate::gateway::handlers::app::my_exchange,
    ),
    components(
        schemas(
            HealthResponse,
            ErrorResponse,
            ErrorBody,
            Account,
            Transaction,
            TransactionKind,
            TransactionType,
            ActorType,
            CreateAccountBody,
            PostTransactionBody,
            ExchangeRequest,
            ExchangeResult,
            AppExchangeBody,
            IntegrityReport,
            Audit,
            AuditOperation,
            DeadLetter,
            Wallet,
            NewWallet,
            UpdateWallet,
            Tier,
            NewTier,
            UpdateTier,
            User,
            NewUser,
            UpdateUser,
            ExchangeRate,
            NewExchangeRate,
            UpdateExchangeRate,
            Trigger,
            NewTrigger,
            UpdateTrigger,
            Program,
            NewProgram,
            UpdateProgram,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Accounts", description = "Wallet accounts (backoffice)"),
        (name = "Transactions", description = "Postings and exchange (backoffice)"),
        (name = "Integrity", description = "Balance versus log consistency"),
        (name = "Audit", description = "Audit trail and dead letters"),
        (name = "App", description = "User-scoped endpoints"),
        (name = "System", description = "Health checks and system info")
    )
)]
pub struct ApiDoc;
