//! Wallet Ledger service entry point
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌────────────┐    ┌──────────┐
//! │  Config  │───▶│  Store   │───▶│  Engines   │───▶│ Gateway  │
//! │  (YAML)  │    │ (PG/mem) │    │ + Dispatch │    │  (axum)  │
//! └──────────┘    └──────────┘    └────────────┘    └──────────┘
//! ```
//!
//! Exit codes: 0 clean shutdown, 1 configuration error, 2 database
//! connection failure, 3 forced abort with requests or program events pending.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use wallet_ledger::config::AppConfig;
use wallet_ledger::db::Database;
use wallet_ledger::dispatcher::{EventPublisher, NatsPublisher, ProgramDispatcher};
use wallet_ledger::gateway::{self, ShutdownOutcome, state::AppState};
use wallet_ledger::logging;
use wallet_ledger::store::{LedgerStore, MemoryStore, PgStore};

const EXIT_CONFIG: u8 = 1;
const EXIT_DATABASE: u8 = 2;
const EXIT_FORCED: u8 = 3;

/// `--env <name>` / `-e <name>`, then `APP_ENV`, then `dev`
fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string())
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn LedgerStore>, ExitCode> {
    if config.in_memory {
        tracing::warn!("Running with the in-memory store; state is lost on exit");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let db = Database::connect(&config.database).await.map_err(|e| {
        tracing::error!(error = %e, host = %config.database.host, "Database connection failed");
        eprintln!("FATAL: database connection failed: {}", e);
        ExitCode::from(EXIT_DATABASE)
    })?;
    let store = PgStore::new(db);
    store.bootstrap().await.map_err(|e| {
        tracing::error!(error = %e, "Schema bootstrap failed");
        eprintln!("FATAL: schema bootstrap failed: {}", e);
        ExitCode::from(EXIT_DATABASE)
    })?;
    Ok(Arc::new(store))
}

async fn open_dispatcher(config: &AppConfig, store: Arc<dyn LedgerStore>) -> Option<Arc<ProgramDispatcher>> {
    if config.broker.brokers.is_empty() {
        tracing::warn!("No event bus configured, program events are not published");
        return None;
    }
    match NatsPublisher::connect(&config.broker.brokers).await {
        Ok(publisher) => {
            let publisher: Arc<dyn EventPublisher> = Arc::new(publisher);
            Some(Arc::new(ProgramDispatcher::new(
                store,
                publisher,
                config.broker.topic_prefix.clone(),
            )))
        }
        Err(e) => {
            tracing::error!(error = %e, "Event bus unreachable, program events are not published");
            None
        }
    }
}

async fn run(config: AppConfig) -> ExitCode {
    let store = match open_store(&config).await {
        Ok(store) => store,
        Err(code) => return code,
    };
    let dispatcher = open_dispatcher(&config, store.clone()).await;

    let state = Arc::new(AppState::new(
        store,
        dispatcher,
        config.jwt_secret.clone(),
        Duration::from_millis(config.gateway.request_timeout_ms),
    ));

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr, "Failed to bind");
            eprintln!("FATAL: failed to bind to {}: {}", addr, e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    tracing::info!(addr, "Gateway listening, API docs at /docs");

    let grace = Duration::from_millis(config.gateway.shutdown_grace_ms);
    match gateway::run_server(listener, state, grace).await {
        Ok(ShutdownOutcome::Clean) => ExitCode::SUCCESS,
        Ok(ShutdownOutcome::Forced { pending }) => {
            eprintln!("Aborted with {} request(s) or event(s) pending", pending);
            ExitCode::from(EXIT_FORCED)
        }
        Err(e) => {
            tracing::error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let env = get_env();
    let config = match AppConfig::load(&env) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let _log_guard = logging::init_logging(&config);

    tracing::info!(env = %env, version = env!("GIT_HASH"), "Starting wallet_ledger");
    run(config).await
}
