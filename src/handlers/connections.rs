//! # Connections API Handlers
//!
//! Tenant-scoped listing and management of paired channel connections, plus
//! the one-shot verification and manual status refresh endpoints.

use axum::{
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{OperatorAuth, TenantExtension, TenantHeader};
use crate::connections::VerificationResponse;
use crate::error::{ApiError, validation_error};
use crate::models::connection::{self, ConnectionStatus};
use crate::pairing::PAIRING_SUB_ID;
use crate::provider::PairingQuery;
use crate::server::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 100;

/// Query parameters for connections listing
#[derive(Debug, Deserialize, Serialize, IntoParams, ToSchema)]
pub struct ListConnectionsQuery {
    /// Maximum number of connections to return (default: 50, max: 100)
    pub limit: Option<i64>,
    /// Opaque cursor for pagination continuation
    pub cursor: Option<String>,
}

/// Connection information for API responses. Never carries the secret.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    /// Agent the account was paired for
    #[schema(value_type = String)]
    pub agent_id: Uuid,
    /// Provider-side account identifier
    pub provider_unique: String,
    pub phone_number: Option<String>,
    pub status: ConnectionStatus,
    /// Inbound webhook URL, once configured
    pub webhook_url: Option<String>,
    /// Indicates whether an encrypted provider secret is stored
    #[schema(default = false, example = true)]
    pub has_secret: bool,
    pub sub_id: String,
    pub created_at: String,
    pub updated_at: String,
}

fn rfc3339(dt: &sea_orm::prelude::DateTimeWithTimeZone) -> String {
    let utc: DateTime<Utc> = dt.naive_utc().and_utc();
    utc.to_rfc3339()
}

impl From<connection::Model> for ConnectionInfo {
    fn from(model: connection::Model) -> Self {
        Self {
            has_secret: model.has_secret(),
            created_at: rfc3339(&model.created_at),
            updated_at: rfc3339(&model.updated_at),
            id: model.id,
            agent_id: model.agent_id,
            provider_unique: model.provider_unique,
            phone_number: model.phone_number,
            status: model.status,
            webhook_url: model.webhook_url,
            sub_id: model.sub_id,
        }
    }
}

/// Response wrapper for connections listing
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionsResponse {
    pub connections: Vec<ConnectionInfo>,
    /// Opaque cursor for fetching the next page (null if this is the last page)
    pub next_cursor: Option<String>,
}

/// Response of a manual refresh
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    pub connections: Vec<ConnectionInfo>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct UpdateConnectionRequest {
    /// Replacement provider secret
    pub secret: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct VerifyConnectionRequest {
    /// Pairing token returned when the code was requested
    pub info_link: String,
    pub secret: String,
    /// Provider sub-account id (defaults to "3")
    pub sub_id: Option<String>,
    #[schema(value_type = String)]
    pub agent_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookResponse {
    pub webhook_url: String,
}

/// Lists connections for the authenticated tenant, oldest first
#[utoipa::path(
    get,
    path = "/connections",
    security(("bearer_auth" = [])),
    params(TenantHeader, ListConnectionsQuery),
    responses(
        (status = 200, description = "List of tenant connections", body = ConnectionsResponse, example = json!({
            "connections": [
                {
                    "id": "550e8400-e29b-41d4-a716-446655440000",
                    "agent_id": "0b5f1f7e-2f4a-4f63-9d1c-7b4c1f3e9a10",
                    "provider_unique": "acc-1",
                    "phone_number": "5511999990000",
                    "status": "ativo",
                    "webhook_url": null,
                    "has_secret": true,
                    "sub_id": "3",
                    "created_at": "2026-10-01T12:00:00+00:00",
                    "updated_at": "2026-10-01T12:00:00+00:00"
                }
            ],
            "next_cursor": null
        })),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "operators"
)]
pub async fn list_connections(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Query(query): Query<ListConnectionsQuery>,
) -> Result<Json<ConnectionsResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "limit must be between 1 and 100",
        ));
    }

    let (connections, next_cursor) = state
        .connections
        .list(tenant.0, limit as u64, query.cursor.as_deref())
        .await?;

    Ok(Json(ConnectionsResponse {
        connections: connections.into_iter().map(ConnectionInfo::from).collect(),
        next_cursor,
    }))
}

#[utoipa::path(
    get,
    path = "/connections/{id}",
    security(("bearer_auth" = [])),
    params(TenantHeader, ("id" = String, Path, description = "Connection ID")),
    responses(
        (status = 200, description = "Connection", body = ConnectionInfo),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Connection not found", body = ApiError)
    ),
    tag = "operators"
)]
pub async fn get_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionInfo>, ApiError> {
    let connection = state.connections.get(tenant.0, id).await?;
    Ok(Json(connection.into()))
}

/// Replaces the stored provider secret of a connection
#[utoipa::path(
    patch,
    path = "/connections/{id}",
    security(("bearer_auth" = [])),
    params(TenantHeader, ("id" = String, Path, description = "Connection ID")),
    request_body = UpdateConnectionRequest,
    responses(
        (status = 200, description = "Updated connection", body = ConnectionInfo),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Connection not found", body = ApiError)
    ),
    tag = "operators"
)]
pub async fn update_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateConnectionRequest>, JsonRejection>,
) -> Result<Json<ConnectionInfo>, ApiError> {
    let Json(request) = payload?;
    let updated = state
        .connections
        .update_secret(tenant.0, id, &request.secret)
        .await?;
    Ok(Json(updated.into()))
}

/// Deletes a connection locally; the provider-side account delete is best effort
#[utoipa::path(
    delete,
    path = "/connections/{id}",
    security(("bearer_auth" = [])),
    params(TenantHeader, ("id" = String, Path, description = "Connection ID")),
    responses(
        (status = 204, description = "Connection deleted"),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Connection not found", body = ApiError)
    ),
    tag = "operators"
)]
pub async fn delete_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.connections.delete(tenant.0, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Builds and stores the inbound webhook URL of a connection
#[utoipa::path(
    post,
    path = "/connections/{id}/webhook",
    security(("bearer_auth" = [])),
    params(TenantHeader, ("id" = String, Path, description = "Connection ID")),
    responses(
        (status = 200, description = "Webhook URL configured", body = WebhookResponse, example = json!({
            "webhook_url": "https://crm.example.com/webhooks/whatsapp/550e8400-e29b-41d4-a716-446655440000"
        })),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Connection not found", body = ApiError),
        (status = 500, description = "Webhook base URL not configured", body = ApiError)
    ),
    tag = "operators"
)]
pub async fn configure_webhook(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let webhook_url = state.connections.configure_webhook(tenant.0, id).await?;
    Ok(Json(WebhookResponse { webhook_url }))
}

/// Queries the pairing status once and creates the connection if it is complete
#[utoipa::path(
    post,
    path = "/connections/verify",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    request_body = VerifyConnectionRequest,
    responses(
        (status = 200, description = "Verification result", body = VerificationResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 502, description = "Provider unreachable", body = ApiError)
    ),
    tag = "operators"
)]
pub async fn verify_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    payload: Result<Json<VerifyConnectionRequest>, JsonRejection>,
) -> Result<Json<VerificationResponse>, ApiError> {
    let Json(request) = payload?;

    let sub_id = match request.sub_id {
        Some(sub_id) if sub_id.trim().is_empty() => {
            return Err(validation_error(
                "sub_id must not be blank",
                serde_json::json!({ "sub_id": "must not be blank" }),
            ));
        }
        Some(sub_id) => sub_id,
        None => PAIRING_SUB_ID.to_string(),
    };

    let response = state
        .connections
        .verify_once(
            tenant.0,
            request.agent_id,
            PairingQuery {
                info_link: request.info_link,
                secret: request.secret,
                sub_id,
            },
        )
        .await?;
    Ok(Json(response))
}

/// Refreshes the status of every connection of the tenant against the provider
#[utoipa::path(
    post,
    path = "/connections/refresh",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 200, description = "Refreshed connections", body = RefreshResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "operators"
)]
pub async fn refresh_connections(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
) -> Result<Json<RefreshResponse>, ApiError> {
    let refreshed = state.refresher.refresh_tenant(tenant.0).await?;
    Ok(Json(RefreshResponse {
        connections: refreshed.into_iter().map(ConnectionInfo::from).collect(),
    }))
}
