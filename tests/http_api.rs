//! HTTP surface: routing, auth, status codes and envelopes

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tower::ServiceExt;

use wallet_ledger::context::ActorType;
use wallet_ledger::dispatcher::{MemoryPublisher, ProgramDispatcher};
use wallet_ledger::gateway::middleware::{Claims, REQUEST_ID_HEADER};
use wallet_ledger::gateway::{ShutdownOutcome, router, settle_events, state::AppState};
use wallet_ledger::store::{LedgerStore, MemoryStore};

const SECRET: &str = "test-secret";

fn app() -> Router {
    let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
    let state = AppState::new(store, None, SECRET, Duration::from_secs(5));
    router(Arc::new(state))
}

fn token(actor_type: ActorType, sub: &str) -> String {
    let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize;
    let claims = Claims {
        sub: sub.to_string(),
        actor_type,
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn backoffice() -> String {
    token(ActorType::Backoffice, "ops-1")
}

async fn call(app: &Router, method: &str, uri: &str, bearer: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", bearer));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Wallet `points` with user `u1` and its account; returns the account id
async fn seed(app: &Router) -> String {
    let bo = backoffice();
    let (status, _) = call(
        app,
        "POST",
        "/api/v1/backoffice/wallets",
        Some(&bo),
        Some(json!({"id": "points", "name": "Points"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(
        app,
        "POST",
        "/api/v1/backoffice/users",
        Some(&bo),
        Some(json!({"id": "u1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(
        app,
        "POST",
        "/api/v1/backoffice/wallets/points/accounts",
        Some(&bo),
        Some(json!({"userId": "u1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["data"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_is_public() {
    let app = app();
    let (status, body) = call(&app, "GET", "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.to_string().contains("ok"));
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = app();
    let request = Request::builder()
        .uri("/api/v1/health")
        .header(REQUEST_ID_HEADER, "req-123")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(
        response.headers().get(REQUEST_ID_HEADER).unwrap(),
        "req-123"
    );
}

#[tokio::test]
async fn test_backoffice_requires_token() {
    let app = app();
    let (status, body) = call(&app, "GET", "/api/v1/backoffice/wallets", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    assert_eq!(body["error"]["httpCode"], 401);

    let (status, _) = call(&app, "GET", "/api/v1/backoffice/wallets", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_user_token_cannot_reach_backoffice() {
    let app = app();
    let user = token(ActorType::User, "u1");
    let (status, body) = call(&app, "GET", "/api/v1/backoffice/wallets", Some(&user), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, _) = call(&app, "GET", "/api/v1/app/wallets/points/account", Some(&backoffice()), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_deposit_withdraw_and_integrity() {
    let app = app();
    let bo = backoffice();
    let account_id = seed(&app).await;
    let uri = "/api/v1/backoffice/wallets/points/transactions";

    let (status, body) = call(
        &app,
        "POST",
        uri,
        Some(&bo),
        Some(json!({
            "accountId": account_id,
            "kind": "DEPOSIT",
            "amount": 500,
            "actorType": "BACKOFFICE",
            "actorId": "ops-1",
            "expectedVersion": 0
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["type"], "CREDIT");
    assert_eq!(body["data"]["newBalance"], 500);
    assert_eq!(body["data"]["version"], 1);

    let (status, body) = call(
        &app,
        "POST",
        uri,
        Some(&bo),
        Some(json!({
            "accountId": account_id,
            "kind": "WITHDRAW",
            "amount": 200,
            "actorType": "BACKOFFICE",
            "expectedVersion": 1
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["newBalance"], 300);

    // Stale version
    let (status, body) = call(
        &app,
        "POST",
        uri,
        Some(&bo),
        Some(json!({
            "accountId": account_id,
            "kind": "WITHDRAW",
            "amount": 1,
            "actorType": "BACKOFFICE",
            "expectedVersion": 1
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
    assert_eq!(body["error"]["reason"], "VERSION_MISMATCH");

    let (status, body) = call(
        &app,
        "GET",
        "/api/v1/backoffice/wallets/points/check-integrity",
        Some(&bo),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"],
        json!({"accountsSum": 300, "transactionsSum": 300, "diff": 0})
    );

    let (status, body) = call(
        &app,
        "GET",
        "/api/v1/backoffice/wallets/points/transactions?page=1&limit=1",
        Some(&bo),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["amount"], 200, "newest first");
}

#[tokio::test]
async fn test_replayed_reference_returns_200() {
    let app = app();
    let bo = backoffice();
    let account_id = seed(&app).await;
    let body = json!({
        "accountId": account_id,
        "kind": "REFUND",
        "amount": 50,
        "actorType": "SYSTEM",
        "reference": "order-42"
    });
    let uri = "/api/v1/backoffice/wallets/points/transactions";

    let (first_status, first) = call(&app, "POST", uri, Some(&bo), Some(body.clone())).await;
    let (second_status, second) = call(&app, "POST", uri, Some(&bo), Some(body)).await;
    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(first["data"]["id"], second["data"]["id"]);
}

#[tokio::test]
async fn test_insufficient_balance_is_406() {
    let app = app();
    let account_id = seed(&app).await;
    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/backoffice/wallets/points/transactions",
        Some(&backoffice()),
        Some(json!({
            "accountId": account_id,
            "kind": "PURCHASE",
            "amount": 1,
            "actorType": "USER",
            "actorId": "u1"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_BALANCE");
}

#[tokio::test]
async fn test_validation_errors() {
    let app = app();
    let bo = backoffice();
    seed(&app).await;

    let (status, body) = call(
        &app,
        "GET",
        "/api/v1/backoffice/wallets/points/accounts?limit=0",
        Some(&bo),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["fields"]["limit"].is_array());

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/backoffice/wallets/points/transactions",
        Some(&bo),
        Some(json!({"accountId": "x", "kind": "DEPOSIT", "amount": -5, "actorType": "SYSTEM"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_unknown_wallet_is_404() {
    let app = app();
    let (status, body) = call(
        &app,
        "GET",
        "/api/v1/backoffice/wallets/gems/accounts",
        Some(&backoffice()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["reason"], "WALLET_NOT_FOUND");
}

#[tokio::test]
async fn test_tier_create_is_audited() {
    let app = app();
    let bo = backoffice();
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/backoffice/tiers")
        .header(header::AUTHORIZATION, format!("Bearer {}", bo))
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-audit-remarks", "launch")
        .body(Body::from(json!({"id": "gold", "name": "Gold"}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let (status, body) = call(
        &app,
        "GET",
        "/api/v1/backoffice/audit/record/tiers/gold",
        Some(&bo),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["operation"], "CREATE");
    assert_eq!(rows[0]["actor"], "BACKOFFICE");
    assert_eq!(rows[0]["actorId"], "ops-1");
    assert_eq!(rows[0]["remarks"], "launch");
    assert_eq!(rows[0]["newRecord"]["id"], "gold");
    assert_eq!(rows[0]["newRecord"]["name"], "Gold");
}

#[tokio::test]
async fn test_app_routes_are_scoped_to_token_user() {
    let app = app();
    seed(&app).await;
    let user = token(ActorType::User, "u1");

    let (status, body) = call(&app, "GET", "/api/v1/app/wallets/points/account", Some(&user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["userId"], "u1");
    assert_eq!(body["data"]["balance"], 0);

    let stranger = token(ActorType::User, "u2");
    let (status, _) = call(&app, "GET", "/api/v1/app/wallets/points/account", Some(&stranger), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_exchange_path_must_match_source_wallet() {
    let app = app();
    seed(&app).await;
    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/backoffice/wallets/points/transactions/exchange",
        Some(&backoffice()),
        Some(json!({"fromWalletId": "cash", "toWalletId": "points", "userId": "u1", "amount": 10})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["fields"]["fromWalletId"].is_array());
}

#[tokio::test]
async fn test_shutdown_is_clean_without_pending_work() {
    let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
    let state = AppState::new(store, None, SECRET, Duration::from_secs(5));
    assert_eq!(settle_events(&state, 0, Duration::ZERO).await, ShutdownOutcome::Clean);
    assert_eq!(
        settle_events(&state, 2, Duration::ZERO).await,
        ShutdownOutcome::Forced { pending: 2 }
    );
}

#[tokio::test(start_paused = true)]
async fn test_undelivered_event_forces_shutdown() {
    let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
    let publisher = Arc::new(MemoryPublisher::failing(u32::MAX));
    let dispatcher = Arc::new(ProgramDispatcher::new(store.clone(), publisher.clone(), ""));
    let state = Arc::new(AppState::new(store, Some(dispatcher), SECRET, Duration::from_secs(5)));
    let app = router(state.clone());
    let bo = backoffice();
    let account_id = seed(&app).await;

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/backoffice/triggers",
        Some(&bo),
        Some(json!({
            "slug": "points-earned",
            "name": "Points earned",
            "walletId": "points",
            "transactionType": "CREDIT"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/backoffice/wallets/points/transactions",
        Some(&bo),
        Some(json!({"accountId": account_id, "kind": "DEPOSIT", "amount": 5, "actorType": "BACKOFFICE"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let outcome = settle_events(&state, 0, Duration::from_millis(50)).await;
    assert_eq!(outcome, ShutdownOutcome::Forced { pending: 1 });
    assert!(publisher.published().await.is_empty());

    let (status, body) = call(&app, "GET", "/api/v1/backoffice/dead-letters", Some(&bo), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["topic"], "points-earned");
}
