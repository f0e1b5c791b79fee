//! # Error Handling
//!
//! Unified problem+json error responses with trace ID propagation, plus the
//! mappings from domain errors onto HTTP statuses.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::connections::ConnectionError;
use crate::pairing::PairingError;
use crate::provider::ProviderError;
use crate::telemetry;

const BODY_SNIPPET_CHARS: usize = 200;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: &str) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Trace ID of the running request, or a generated correlation ID outside one
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(String::into_boxed_str)
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]).into())
            })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<ProviderError> for ApiError {
    fn from(error: ProviderError) -> Self {
        provider_error(&error)
    }
}

impl From<ConnectionError> for ApiError {
    fn from(error: ConnectionError) -> Self {
        match error {
            ConnectionError::NotFound(id) => not_found("connection", &id.to_string()),
            ConnectionError::Validation(message) => validation_error(&message, json!({})),
            ConnectionError::WebhookBaseUrlMissing => configuration_error(
                "Webhook base URL is not configured; set CHANNELS_WEBHOOK_BASE_URL",
            ),
            ConnectionError::InvalidWebhookBaseUrl(detail) => {
                configuration_error(&format!("Webhook base URL is invalid: {detail}"))
            }
            ConnectionError::Provider(err) => provider_error(&err),
            ConnectionError::Crypto(err) => {
                tracing::error!(error = %err, "Secret encryption failure");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "An internal error occurred",
                )
            }
            ConnectionError::Storage(err) => err.into(),
        }
    }
}

impl From<PairingError> for ApiError {
    fn from(error: PairingError) -> Self {
        match error {
            PairingError::EmptySecret => validation_error(
                "secret must not be empty",
                json!({ "secret": "must not be empty" }),
            ),
            PairingError::NotFound(id) => not_found("pairing attempt", &id.to_string()),
            PairingError::Provider(err) => provider_error(&err),
        }
    }
}

/// All provider failures map to 502 PROVIDER_ERROR
pub fn provider_error(error: &ProviderError) -> ApiError {
    let mut details = json!({ "kind": provider_error_kind(error) });
    match error {
        ProviderError::Http { status, body } => {
            details["status"] = json!(status);
            if let Some(body) = body {
                details["body_snippet"] = json!(truncate(body));
            }
        }
        ProviderError::Rejected { message: Some(message) } => {
            details["provider_message"] = json!(truncate(message));
        }
        _ => {}
    }

    tracing::warn!(error = %error, "Provider call failed");
    ApiError::new(
        StatusCode::BAD_GATEWAY,
        "PROVIDER_ERROR",
        "The messaging provider request failed",
    )
    .with_details(details)
}

fn provider_error_kind(error: &ProviderError) -> &'static str {
    match error {
        ProviderError::Transport(_) => "transport",
        ProviderError::Http { .. } => "http",
        ProviderError::Malformed(_) => "malformed",
        ProviderError::Rejected { .. } => "rejected",
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() > BODY_SNIPPET_CHARS {
        let truncated: String = text.chars().take(BODY_SNIPPET_CHARS).collect();
        format!("{}...", truncated)
    } else {
        text.to_string()
    }
}

/// Create a configuration error (500)
pub fn configuration_error(message: &str) -> ApiError {
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "CONFIGURATION_ERROR",
        message,
    )
}

/// Create a not found error (404)
pub fn not_found(resource: &str, id: &str) -> ApiError {
    ApiError::new(
        StatusCode::NOT_FOUND,
        "NOT_FOUND",
        &format!("{resource} '{id}' not found"),
    )
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}
