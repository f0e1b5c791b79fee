//! Pairing of messaging accounts
//!
//! A pairing attempt requests a scannable code from the provider, then polls
//! the provider until the account is connected, the provider reports a
//! failure, or the attempt budget runs out.

pub mod machine;
pub mod manager;
pub mod poller;

use thiserror::Error;
use uuid::Uuid;

use crate::provider::ProviderError;

pub use machine::{
    DEFAULT_ERROR_MESSAGE, FailureReason, MAX_ATTEMPTS, PAIRING_SUB_ID, POLL_INTERVAL, PairingMachine,
    PairingState, PairingSuccess, PollOutcome, TIMEOUT_MESSAGE, Transition,
};
pub use manager::{AttemptStatus, PairingManager, PairingSnapshot, PairingStarted};
pub use poller::{ConnectionPoller, PairingEvents, PollerExit};

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("secret must not be empty")]
    EmptySecret,
    #[error("pairing attempt {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}
