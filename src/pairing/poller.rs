//! Connection poller
//!
//! Drives one [`PairingMachine`] against the provider: one status query per
//! interval, never two in flight, stopping on the first terminal state or
//! when its cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::machine::{FailureReason, PairingMachine, PairingState, PairingSuccess, PollOutcome, Transition};
use crate::provider::{MessagingProvider, PairingQuery};

/// Callbacks fired once when an attempt reaches a terminal state.
#[async_trait]
pub trait PairingEvents: Send + Sync {
    async fn on_success(&self, success: &PairingSuccess);
    async fn on_error(&self, message: &str, reason: FailureReason);
}

/// How a poller run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerExit {
    Finished(PairingState),
    Cancelled,
}

pub struct ConnectionPoller {
    machine: PairingMachine,
    provider: Arc<dyn MessagingProvider>,
    query: PairingQuery,
    interval: Duration,
    cancel: CancellationToken,
    state_tx: watch::Sender<PairingState>,
}

impl ConnectionPoller {
    pub fn new(
        provider: Arc<dyn MessagingProvider>,
        query: PairingQuery,
        interval: Duration,
        max_attempts: u32,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<PairingState>) {
        let machine = PairingMachine::new(max_attempts);
        let (state_tx, state_rx) = watch::channel(machine.state().clone());
        (
            Self {
                machine,
                provider,
                query,
                interval,
                cancel,
                state_tx,
            },
            state_rx,
        )
    }

    /// Poll until a terminal state or cancellation.
    ///
    /// The first query goes out one interval after the call. A query already
    /// in flight when the token fires completes, but its answer is dropped.
    pub async fn run(mut self, events: &dyn PairingEvents) -> PollerExit {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Pairing poller cancelled");
                    return PollerExit::Cancelled;
                }
                _ = ticker.tick() => {}
            }

            counter!("pairing_poll_ticks_total").increment(1);
            let response = self.provider.check_pairing(&self.query).await;
            if self.cancel.is_cancelled() {
                debug!("Dropping pairing answer received after cancellation");
                return PollerExit::Cancelled;
            }

            let outcome = PollOutcome::from_response(response);
            counter!("pairing_outcomes_total", "outcome" => outcome.label()).increment(1);
            if let PollOutcome::Failed(ref detail) = outcome {
                warn!(error = %detail, "Pairing status query failed");
            }

            match self.machine.transition(outcome) {
                Transition::Continue { attempts } => {
                    debug!(attempts, "Pairing still waiting");
                    self.state_tx.send_replace(self.machine.state().clone());
                }
                Transition::Finished(state) => {
                    match &state {
                        PairingState::Success(success) => {
                            info!(phone_number = %success.phone_number, "Pairing succeeded");
                            events.on_success(success).await;
                        }
                        PairingState::Error { message, reason } => {
                            info!(?reason, detail = %message, "Pairing failed");
                            events.on_error(message, *reason).await;
                        }
                        PairingState::Waiting { .. } => {}
                    }
                    self.state_tx.send_replace(state.clone());
                    return PollerExit::Finished(state);
                }
                Transition::Ignored => {
                    return PollerExit::Finished(self.machine.state().clone());
                }
            }
        }
    }
}
