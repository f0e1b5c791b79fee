//! # Authentication
//!
//! Operator bearer authentication and tenant resolution for protected routes.
//! The tenant a request acts for comes from the `X-Tenant-Id` header.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized, validation_error};
use crate::server::AppState;

pub const TENANT_HEADER: &str = "X-Tenant-Id";

/// Tenant resolved for the current request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantId(pub Uuid);

/// Marker type for authenticated operator requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAuth;

/// Extractor for the tenant placed in request extensions by [`auth_middleware`]
#[derive(Debug, Clone, Copy)]
pub struct TenantExtension(pub TenantId);

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Validates the bearer token and tenant header, then records both on the request.
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())?;
    validate_token(&config, token)?;

    let tenant = tenant_id(request.headers())?;
    tracing::debug!(tenant_id = %tenant.0, "Authenticated operator request");

    request.extensions_mut().insert(TenantExtension(tenant));
    request.extensions_mut().insert(OperatorAuth);

    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))
}

fn validate_token(config: &AppConfig, token: &str) -> Result<(), ApiError> {
    let is_valid = config
        .operator_tokens
        .iter()
        .any(|configured| ConstantTimeEq::ct_eq(token.as_bytes(), configured.as_bytes()).into());

    if is_valid {
        Ok(())
    } else {
        Err(unauthorized(Some("Invalid bearer token")))
    }
}

fn tenant_id(headers: &HeaderMap) -> Result<TenantId, ApiError> {
    let value = headers
        .get(TENANT_HEADER)
        .ok_or_else(|| {
            validation_error(
                "Missing required header",
                serde_json::json!({ TENANT_HEADER: "Required header is missing" }),
            )
        })?
        .to_str()
        .map_err(|_| {
            validation_error(
                "Invalid tenant header",
                serde_json::json!({ TENANT_HEADER: "Header must be valid UTF-8" }),
            )
        })?;

    value.trim().parse::<Uuid>().map(TenantId).map_err(|_| {
        validation_error(
            "Invalid tenant ID",
            serde_json::json!({ TENANT_HEADER: "Must be a valid UUID" }),
        )
    })
}

/// OpenAPI header parameter for X-Tenant-Id
#[derive(Debug, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Header)]
pub struct TenantHeader {
    /// Tenant (workspace) identifier the request acts for
    #[serde(rename = "X-Tenant-Id")]
    #[param(rename = "X-Tenant-Id", value_type = String)]
    pub tenant_id: String,
}

impl<S> FromRequestParts<S> for TenantExtension
where
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantExtension>()
            .copied()
            .ok_or_else(|| {
                validation_error(
                    "Tenant context missing",
                    serde_json::json!({ TENANT_HEADER: "Tenant context not present" }),
                )
            })
    }
}

impl<S> FromRequestParts<S> for OperatorAuth
where
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OperatorAuth>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Operator authentication required")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn config() -> AppConfig {
        AppConfig {
            operator_tokens: vec!["op-token".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn bearer_scheme_is_required() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer op-token"));
        assert_eq!(bearer_token(&headers).unwrap(), "op-token");
    }

    #[test]
    fn only_configured_tokens_validate() {
        assert!(validate_token(&config(), "op-token").is_ok());
        assert!(validate_token(&config(), "op-token2").is_err());
        assert!(validate_token(&config(), "").is_err());
    }

    #[test]
    fn tenant_header_must_be_uuid() {
        let mut headers = HeaderMap::new();
        assert!(tenant_id(&headers).is_err());

        headers.insert(TENANT_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert!(tenant_id(&headers).is_err());

        let id = Uuid::new_v4();
        headers.insert(TENANT_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        assert_eq!(tenant_id(&headers).unwrap(), TenantId(id));
    }
}
