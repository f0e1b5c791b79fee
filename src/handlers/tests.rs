//! # Tests for Handlers
//!
//! Router-level tests against an in-memory SQLite database and a provider
//! that is never reachable.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db;
use crate::handlers::root;
use crate::provider::{
    MessagingProvider, PairingCode, PairingQuery, PairingStatusData, ProviderAccount,
    ProviderEnvelope, ProviderError,
};
use crate::server::{AppState, create_app};
use crate::telemetry::TRACE_ID_HEADER;

const TOKEN: &str = "test-token-123";

struct UnreachableProvider;

#[async_trait]
impl MessagingProvider for UnreachableProvider {
    async fn request_pairing_code(&self, _secret: &str) -> Result<PairingCode, ProviderError> {
        Err(ProviderError::Transport("connection refused".to_string()))
    }

    async fn check_pairing(
        &self,
        _query: &PairingQuery,
    ) -> Result<ProviderEnvelope<PairingStatusData>, ProviderError> {
        Err(ProviderError::Transport("connection refused".to_string()))
    }

    async fn list_accounts(&self, _secret: &str) -> Result<Vec<ProviderAccount>, ProviderError> {
        Err(ProviderError::Transport("connection refused".to_string()))
    }

    async fn delete_account(
        &self,
        _secret: &str,
        _provider_unique: &str,
    ) -> Result<(), ProviderError> {
        Err(ProviderError::Transport("connection refused".to_string()))
    }
}

async fn test_app(webhook_base_url: Option<&str>) -> Router {
    let config = AppConfig {
        operator_tokens: vec![TOKEN.to_string()],
        crypto_key: Some(vec![7u8; 32]),
        database_url: "sqlite::memory:".to_string(),
        db_max_connections: 1,
        webhook_base_url: webhook_base_url.map(str::to_owned),
        ..Default::default()
    };
    let pool = db::init_pool(&config).await.unwrap();
    db::run_migrations(&pool).await.unwrap();

    let state = AppState::build(
        Arc::new(config),
        pool,
        Arc::new(UnreachableProvider),
        CancellationToken::new(),
    )
    .unwrap();
    create_app(state)
}

fn authed(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {TOKEN}"))
        .header("X-Tenant-Id", Uuid::new_v4().to_string());
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_root_handler_returns_expected_service_info() {
    let axum::Json(service_info) = root().await;
    assert_eq!(service_info.service, "channels");
    assert_eq!(service_info.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_healthz_reports_database_ok() {
    let app = test_app(None).await;
    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["database"], "ok");
    assert_eq!(body["pairing_sessions"], 0);
}

#[tokio::test]
async fn test_protected_route_requires_bearer_token() {
    let app = test_app(None).await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/connections")
                .header("X-Tenant-Id", Uuid::new_v4().to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/problem+json"
    );
    let trace_id = response
        .headers()
        .get(TRACE_ID_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body = json_body(response).await;
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert_eq!(body["trace_id"], trace_id);
}

#[tokio::test]
async fn test_missing_tenant_header_is_bad_request() {
    let app = test_app(None).await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/connections")
                .header("Authorization", format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_connections_empty_tenant() {
    let app = test_app(None).await;
    let response = app
        .oneshot(authed("GET", "/connections", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["connections"].as_array().unwrap().len(), 0);
    assert!(body["next_cursor"].is_null());
}

#[tokio::test]
async fn test_list_connections_validates_limit_and_cursor() {
    let app = test_app(None).await;

    let response = app
        .clone()
        .oneshot(authed("GET", "/connections?limit=0", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(authed("GET", "/connections?limit=101", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(authed("GET", "/connections?cursor=%21%21%21", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_unknown_connection_is_not_found() {
    let app = test_app(Some("https://crm.example.com")).await;
    let uri = format!("/connections/{}", Uuid::new_v4());

    let response = app.clone().oneshot(authed("GET", &uri, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(authed("DELETE", &uri, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_configure_webhook_without_base_url_is_configuration_error() {
    let app = test_app(None).await;
    let uri = format!("/connections/{}/webhook", Uuid::new_v4());

    let response = app.oneshot(authed("POST", &uri, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["code"], "CONFIGURATION_ERROR");
}

#[tokio::test]
async fn test_start_pairing_rejects_blank_secret() {
    let app = test_app(None).await;
    let response = app
        .oneshot(authed(
            "POST",
            "/pairings",
            Some(serde_json::json!({ "secret": "  ", "agent_id": Uuid::new_v4() })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_start_pairing_malformed_body_is_problem_json() {
    let app = test_app(None).await;
    let response = app
        .oneshot(authed(
            "POST",
            "/pairings",
            Some(serde_json::json!({ "secret": "s" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_start_pairing_provider_down_is_bad_gateway() {
    let app = test_app(None).await;
    let response = app
        .oneshot(authed(
            "POST",
            "/pairings",
            Some(serde_json::json!({ "secret": "s", "agent_id": Uuid::new_v4() })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["code"], "PROVIDER_ERROR");
    assert_eq!(body["details"]["kind"], "transport");
}

#[tokio::test]
async fn test_unknown_pairing_attempt_is_not_found() {
    let app = test_app(None).await;
    let uri = format!("/pairings/{}", Uuid::new_v4());

    let response = app.clone().oneshot(authed("GET", &uri, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(authed("DELETE", &uri, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_verify_provider_down_is_bad_gateway() {
    let app = test_app(None).await;
    let response = app
        .oneshot(authed(
            "POST",
            "/connections/verify",
            Some(serde_json::json!({
                "info_link": "abc",
                "secret": "s",
                "agent_id": Uuid::new_v4(),
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_openapi_document_lists_routes() {
    use utoipa::OpenApi;

    let doc = crate::server::ApiDoc::openapi();
    let json = serde_json::to_value(&doc).unwrap();
    let paths = json["paths"].as_object().unwrap();
    for path in [
        "/connections",
        "/connections/{id}",
        "/connections/{id}/webhook",
        "/connections/verify",
        "/connections/refresh",
        "/pairings",
        "/pairings/{id}",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }
    assert!(json["components"]["securitySchemes"]["bearer_auth"].is_object());
}
