//! Paired connections: creation after pairing, webhook configuration,
//! secret edits, deletion and provider status refresh.

pub mod refresher;
pub mod service;

use thiserror::Error;
use uuid::Uuid;

use crate::crypto::CryptoError;
use crate::provider::ProviderError;

pub use refresher::{RefreshEntry, RefreshReport, StatusRefresher, refresh_statuses};
pub use service::{ConnectionService, VerificationResponse, VerificationStatus};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection {0} not found")]
    NotFound(Uuid),
    #[error("{0}")]
    Validation(String),
    #[error("webhook base url is not configured")]
    WebhookBaseUrlMissing,
    #[error("webhook base url is invalid: {0}")]
    InvalidWebhookBaseUrl(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("secret could not be processed: {0}")]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
