//! # Pairing API Handlers
//!
//! Start a pairing attempt, watch it, or abandon it.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OperatorAuth, TenantExtension, TenantHeader};
use crate::error::ApiError;
use crate::pairing::{PairingSnapshot, PairingStarted};
use crate::server::AppState;

/// Request payload for starting a pairing attempt
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct StartPairingRequest {
    /// Provider account secret the new number is paired under
    pub secret: String,
    /// Agent the paired account will belong to
    #[schema(value_type = String)]
    pub agent_id: Uuid,
}

/// Requests a pairing code and starts polling the provider in the background
#[utoipa::path(
    post,
    path = "/pairings",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    request_body = StartPairingRequest,
    responses(
        (status = 201, description = "Pairing attempt started", body = PairingStarted, example = json!({
            "attempt_id": "7d0f4f1e-3c55-4b0e-9a57-8a2d6f1c2b3a",
            "qr_image_url": "https://provider.example.com/qr/abc.png",
            "info_link": "abc"
        })),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 502, description = "Provider request failed", body = ApiError)
    ),
    tag = "pairing"
)]
pub async fn start_pairing(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    payload: Result<Json<StartPairingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PairingStarted>), ApiError> {
    let Json(request) = payload?;
    let started = state
        .pairings
        .start(tenant.0, request.agent_id, &request.secret)
        .await?;
    Ok((StatusCode::CREATED, Json(started)))
}

#[utoipa::path(
    get,
    path = "/pairings/{id}",
    security(("bearer_auth" = [])),
    params(TenantHeader, ("id" = String, Path, description = "Pairing attempt ID")),
    responses(
        (status = 200, description = "Current state of the attempt", body = PairingSnapshot),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unknown or expired attempt", body = ApiError)
    ),
    tag = "pairing"
)]
pub async fn get_pairing(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<PairingSnapshot>, ApiError> {
    Ok(Json(state.pairings.status(tenant.0, id)?))
}

/// Stops polling for an attempt and forgets it
#[utoipa::path(
    delete,
    path = "/pairings/{id}",
    security(("bearer_auth" = [])),
    params(TenantHeader, ("id" = String, Path, description = "Pairing attempt ID")),
    responses(
        (status = 204, description = "Attempt cancelled"),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unknown or expired attempt", body = ApiError)
    ),
    tag = "pairing"
)]
pub async fn cancel_pairing(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.pairings.cancel(tenant.0, id)?;
    Ok(StatusCode::NO_CONTENT)
}
