//! Pairing poller state machine
//!
//! A pairing attempt starts in `Waiting` and ends in `Success` or `Error`.
//! Every tick classifies one provider answer into a [`PollOutcome`] and feeds
//! it to [`PairingMachine::transition`], which is the only place the state
//! changes. Checks run in a fixed order on each tick: success, then explicit
//! provider error, then the attempt budget.

use std::time::Duration;

use serde::Serialize;
use utoipa::ToSchema;

use crate::provider::{PairingStatusData, ProviderEnvelope, ProviderError};

/// Spacing between two status queries.
pub const POLL_INTERVAL: Duration = Duration::from_millis(2000);
/// Inconclusive answers tolerated before the attempt times out.
pub const MAX_ATTEMPTS: u32 = 30;
/// Provider sub-identifier sent with every pairing query.
pub const PAIRING_SUB_ID: &str = "3";

pub const TIMEOUT_MESSAGE: &str = "Tempo esgotado para a verificação.";
pub const DEFAULT_ERROR_MESSAGE: &str = "Não foi possível verificar a conexão.";

/// What the provider told us once pairing completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PairingSuccess {
    /// Provider-issued identifier of the paired account
    pub provider_unique: String,
    pub phone_number: String,
    #[serde(skip)]
    pub provider_token: Option<String>,
    /// Raw provider status label, if one was sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The provider explicitly reported a failure
    Provider,
    /// No definitive answer within the attempt budget
    Timeout,
    /// Transport or parse failure talking to the provider
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingState {
    Waiting { attempts: u32 },
    Success(PairingSuccess),
    Error { message: String, reason: FailureReason },
}

impl PairingState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PairingState::Waiting { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            PairingState::Waiting { .. } => "waiting",
            PairingState::Success(_) => "success",
            PairingState::Error { .. } => "error",
        }
    }
}

/// Classification of one status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Connected(PairingSuccess),
    Rejected(Option<String>),
    Pending,
    Failed(String),
}

impl PollOutcome {
    /// Classify a provider answer.
    ///
    /// Connected means status 200, `connected` not false and a phone number.
    /// The provider id falls back to `data.id` and then to the phone number.
    pub fn from_response(
        response: Result<ProviderEnvelope<PairingStatusData>, ProviderError>,
    ) -> Self {
        let envelope = match response {
            Ok(envelope) => envelope,
            Err(err) => return PollOutcome::Failed(err.to_string()),
        };

        if envelope.is_ok()
            && let Some(data) = envelope.data.as_ref()
            && data.connected != Some(false)
            && let Some(phone) = data.number.as_deref().map(str::trim).filter(|n| !n.is_empty())
        {
            let provider_unique = data
                .unique
                .clone()
                .or_else(|| data.id.clone())
                .unwrap_or_else(|| phone.to_string());
            return PollOutcome::Connected(PairingSuccess {
                provider_unique,
                phone_number: phone.to_string(),
                provider_token: data.token.clone(),
                provider_status: data.status.clone(),
            });
        }

        if envelope.is_explicit_error() {
            return PollOutcome::Rejected(envelope.message);
        }

        PollOutcome::Pending
    }

    pub fn label(&self) -> &'static str {
        match self {
            PollOutcome::Connected(_) => "connected",
            PollOutcome::Rejected(_) => "rejected",
            PollOutcome::Pending => "pending",
            PollOutcome::Failed(_) => "failed",
        }
    }
}

/// Result of feeding one outcome to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Still waiting; carries the updated attempt count
    Continue { attempts: u32 },
    /// Reached a terminal state on this tick
    Finished(PairingState),
    /// The machine was already terminal
    Ignored,
}

#[derive(Debug, Clone)]
pub struct PairingMachine {
    state: PairingState,
    max_attempts: u32,
}

impl Default for PairingMachine {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS)
    }
}

impl PairingMachine {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: PairingState::Waiting { attempts: 0 },
            max_attempts,
        }
    }

    pub fn state(&self) -> &PairingState {
        &self.state
    }

    pub fn transition(&mut self, outcome: PollOutcome) -> Transition {
        let PairingState::Waiting { attempts } = self.state else {
            return Transition::Ignored;
        };

        let next = match outcome {
            PollOutcome::Connected(success) => PairingState::Success(success),
            PollOutcome::Rejected(message) => PairingState::Error {
                message: message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
                reason: FailureReason::Provider,
            },
            PollOutcome::Failed(_) => PairingState::Error {
                message: DEFAULT_ERROR_MESSAGE.to_string(),
                reason: FailureReason::Unreachable,
            },
            PollOutcome::Pending if attempts >= self.max_attempts => PairingState::Error {
                message: TIMEOUT_MESSAGE.to_string(),
                reason: FailureReason::Timeout,
            },
            PollOutcome::Pending => {
                self.state = PairingState::Waiting {
                    attempts: attempts + 1,
                };
                return Transition::Continue {
                    attempts: attempts + 1,
                };
            }
        };

        self.state = next.clone();
        Transition::Finished(next)
    }
}
