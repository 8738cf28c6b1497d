//! HTTP gateway
//!
//! ```text
//! /api/v1/health                  public
//! /api/v1/backoffice/*            BACKOFFICE token
//! /api/v1/app/*                   USER token, scoped to its user
//! /docs, /api-docs/openapi.json   OpenAPI
//! ```

pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod state;
pub mod types;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::reference::models::{ExchangeRate, Program, Tier, Trigger, User, Wallet};
use handlers::{app, audit, ledger, reference};
use state::AppState;

/// Build the complete router
pub fn router(state: Arc<AppState>) -> Router {
    let backoffice_routes = Router::new()
        // Wallets and their ledgers
        .route(
            "/wallets",
            post(reference::create_wallet).get(reference::list_records::<Wallet>),
        )
        .route(
            "/wallets/{id}",
            get(reference::get_record::<Wallet>)
                .put(reference::update_wallet)
                .delete(reference::delete_record::<Wallet>),
        )
        .route(
            "/wallets/{id}/accounts",
            post(ledger::create_account).get(ledger::list_accounts),
        )
        .route("/wallets/{id}/accounts/sum", get(ledger::accounts_sum))
        .route(
            "/wallets/{id}/accounts/{account_id}",
            get(ledger::get_account).delete(ledger::delete_account),
        )
        .route(
            "/wallets/{id}/transactions",
            post(ledger::post_transaction).get(ledger::list_transactions),
        )
        .route("/wallets/{id}/transactions/exchange", post(ledger::exchange))
        .route("/wallets/{id}/check-integrity", get(ledger::check_integrity))
        // Governed reference data
        .route(
            "/tiers",
            post(reference::create_tier).get(reference::list_records::<Tier>),
        )
        .route(
            "/tiers/{id}",
            get(reference::get_record::<Tier>)
                .put(reference::update_tier)
                .delete(reference::delete_record::<Tier>),
        )
        .route(
            "/users",
            post(reference::create_user).get(reference::list_records::<User>),
        )
        .route(
            "/users/{id}",
            get(reference::get_record::<User>)
                .put(reference::update_user)
                .delete(reference::delete_record::<User>),
        )
        .route(
            "/exchange-rates",
            post(reference::create_exchange_rate).get(reference::list_records::<ExchangeRate>),
        )
        .route(
            "/exchange-rates/{id}",
            get(reference::get_record::<ExchangeRate>)
                .put(reference::update_exchange_rate)
                .delete(reference::delete_record::<ExchangeRate>),
        )
        .route(
            "/triggers",
            post(reference::create_trigger).get(reference::list_records::<Trigger>),
        )
        .route(
            "/triggers/{id}",
            get(reference::get_record::<Trigger>)
                .put(reference::update_trigger)
                .delete(reference::delete_record::<Trigger>),
        )
        .route(
            "/programs",
            post(reference::create_program).get(reference::list_records::<Program>),
        )
        .route(
            "/programs/{id}",
            get(reference::get_record::<Program>)
                .put(reference::update_program)
                .delete(reference::delete_record::<Program>),
        )
        // Audit
        .route("/audit", get(audit::list_audit))
        .route("/audit/record/{table}/{id}", get(audit::audit_for_record))
        .route("/dead-letters", get(audit::list_dead_letters))
        .layer(from_fn_with_state(state.clone(), middleware::require_backoffice));

    let app_routes = Router::new()
        .route("/wallets/{id}/account", get(app::my_account))
        .route("/wallets/{id}/transactions", get(app::my_transactions))
        .route("/exchange", post(app::my_exchange))
        .layer(from_fn_with_state(state.clone(), middleware::require_user));

    Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        .nest("/api/v1/backoffice", backoffice_routes)
        .nest("/api/v1/app", app_routes)
        .layer(from_fn_with_state(state.clone(), middleware::track_request))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// How the server stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every request finished and every program event settled
    Clean,
    /// Aborted by a second signal or the grace period with work pending:
    /// requests still in flight plus program events left undelivered
    Forced { pending: usize },
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Serve until a signal arrives, then drain for at most `grace`.
///
/// A second signal, or the grace period running out, aborts the server.
/// Program events get whatever is left of the grace period afterwards.
pub async fn run_server(
    listener: TcpListener,
    state: Arc<AppState>,
    grace: Duration,
) -> std::io::Result<ShutdownOutcome> {
    let in_flight = state.in_flight();
    let app = router(state.clone());
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = stop_rx.await;
    });
    let mut server = tokio::spawn(async move { serve.await });

    tokio::select! {
        joined = &mut server => {
            joined.map_err(std::io::Error::other)??;
            return Ok(settle_events(&state, 0, grace).await);
        }
        _ = shutdown_signal() => {}
    }

    let deadline = tokio::time::Instant::now() + grace;
    tracing::info!(
        in_flight = in_flight.load(Ordering::SeqCst),
        grace_ms = grace.as_millis() as u64,
        "Shutdown requested, draining"
    );
    let _ = stop_tx.send(());

    let reason = tokio::select! {
        joined = &mut server => {
            joined.map_err(std::io::Error::other)??;
            tracing::info!("Drained, server stopped");
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            return Ok(settle_events(&state, 0, remaining).await);
        }
        _ = shutdown_signal() => "second signal",
        _ = tokio::time::sleep_until(deadline) => "grace period expired",
    };

    let pending = in_flight.load(Ordering::SeqCst);
    server.abort();
    if pending > 0 {
        tracing::warn!(pending, reason, "Server aborted with requests in flight");
    } else {
        tracing::info!(reason, "Server stopped");
    }
    Ok(settle_events(&state, pending, Duration::ZERO).await)
}

/// Drain program events within `grace` and fold the leftovers into the
/// shutdown outcome.
pub async fn settle_events(state: &AppState, pending_requests: usize, grace: Duration) -> ShutdownOutcome {
    let pending_events = match &state.dispatcher {
        Some(dispatcher) => dispatcher.drain(grace).await.pending,
        None => 0,
    };
    match pending_requests + pending_events {
        0 => ShutdownOutcome::Clean,
        pending => {
            tracing::warn!(pending_requests, pending_events, "Shutdown left work pending");
            ShutdownOutcome::Forced { pending }
        }
    }
}
