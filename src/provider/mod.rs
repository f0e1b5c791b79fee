//! Messaging provider integration
//!
//! The provider issues pairing codes, reports pairing status and lists or
//! deletes the accounts attached to a secret. [`MessagingProvider`] is the seam
//! the rest of the service talks to; [`HttpMessagingProvider`] is the real client.

pub mod http;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpMessagingProvider;
pub use types::{
    PairingCode, PairingQuery, PairingStatusData, ProviderAccount, ProviderEnvelope,
    ProviderStatus,
};

/// Errors returned by provider calls.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network failure, timeout, or unreadable body
    #[error("provider unreachable: {0}")]
    Transport(String),
    /// Non-success HTTP status without a usable envelope
    #[error("provider returned HTTP {status}")]
    Http { status: u16, body: Option<String> },
    /// Success status but a body that does not match the expected shape
    #[error("malformed provider response: {0}")]
    Malformed(String),
    /// The provider answered with an explicit failure status
    #[error("provider rejected the request: {}", message.as_deref().unwrap_or("no message"))]
    Rejected { message: Option<String> },
}

impl ProviderError {
    /// Upstream HTTP status to report, if the failure carried one.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        ProviderError::Transport(error.to_string())
    }
}

/// Operations the pairing flow needs from the messaging provider.
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    /// Request a one-time pairing code for `secret`.
    async fn request_pairing_code(&self, secret: &str) -> Result<PairingCode, ProviderError>;

    /// Query the status of a pending pairing.
    ///
    /// Explicit provider failures are returned as an envelope so the caller can
    /// classify them; only transport and parse failures are `Err`.
    async fn check_pairing(
        &self,
        query: &PairingQuery,
    ) -> Result<ProviderEnvelope<PairingStatusData>, ProviderError>;

    /// List the accounts attached to `secret`.
    async fn list_accounts(&self, secret: &str) -> Result<Vec<ProviderAccount>, ProviderError>;

    /// Remove an account on the provider side.
    async fn delete_account(&self, secret: &str, provider_unique: &str)
    -> Result<(), ProviderError>;
}
