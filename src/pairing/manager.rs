//! Pairing manager
//!
//! Owns every in-flight pairing attempt. Each attempt runs its poller on its
//! own task under a child of the server shutdown token, so cancelling one
//! attempt or shutting the server down stops its timer. Finished attempts stay
//! queryable for a retention window and are then dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::PairingError;
use super::machine::{FailureReason, PAIRING_SUB_ID, PairingState, PairingSuccess};
use super::poller::{ConnectionPoller, PairingEvents, PollerExit};
use crate::config::PairingConfig;
use crate::connections::{ConnectionService, StatusRefresher};
use crate::provider::{MessagingProvider, PairingQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Waiting,
    Success,
    Error,
}

/// Returned when an attempt starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PairingStarted {
    pub attempt_id: Uuid,
    /// Image URL of the scannable code
    pub qr_image_url: String,
    /// Opaque provider token identifying this pairing
    pub info_link: String,
}

/// Point-in-time view of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PairingSnapshot {
    pub attempt_id: Uuid,
    pub agent_id: Uuid,
    pub status: AttemptStatus,
    /// Inconclusive answers so far; only while waiting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

type Materialized = Arc<OnceLock<Result<Uuid, String>>>;

struct PairingSession {
    tenant_id: Uuid,
    agent_id: Uuid,
    state_rx: watch::Receiver<PairingState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    materialized: Materialized,
    created_at: DateTime<Utc>,
}

impl PairingSession {
    fn snapshot(&self, attempt_id: Uuid) -> PairingSnapshot {
        let mut snapshot = PairingSnapshot {
            attempt_id,
            agent_id: self.agent_id,
            status: AttemptStatus::Waiting,
            attempts: None,
            message: None,
            reason: None,
            connection_id: None,
            phone_number: None,
            created_at: self.created_at,
        };

        match &*self.state_rx.borrow() {
            PairingState::Waiting { attempts } => snapshot.attempts = Some(*attempts),
            PairingState::Success(success) => {
                snapshot.status = AttemptStatus::Success;
                snapshot.phone_number = Some(success.phone_number.clone());
                match self.materialized.get() {
                    Some(Ok(connection_id)) => snapshot.connection_id = Some(*connection_id),
                    Some(Err(_)) => {
                        snapshot.message =
                            Some("paired, but the connection could not be saved".to_string())
                    }
                    None => {}
                }
            }
            PairingState::Error { message, reason } => {
                snapshot.status = AttemptStatus::Error;
                snapshot.message = Some(message.clone());
                snapshot.reason = Some(*reason);
            }
        }
        snapshot
    }
}

/// Terminal callbacks for one attempt: create the connection, then follow up.
struct SessionEvents {
    service: ConnectionService,
    refresher: StatusRefresher,
    tenant_id: Uuid,
    agent_id: Uuid,
    secret: Zeroizing<String>,
    materialized: Materialized,
    shutdown: CancellationToken,
}

#[async_trait]
impl PairingEvents for SessionEvents {
    async fn on_success(&self, success: &PairingSuccess) {
        match self
            .service
            .materialize(self.tenant_id, self.agent_id, &self.secret, success)
            .await
        {
            Ok(created) => {
                let _ = self.materialized.set(Ok(created.id));

                let refresher = self.refresher.clone();
                let shutdown = self.shutdown.clone();
                let tenant_id = self.tenant_id;
                let provider_unique = success.provider_unique.clone();
                tokio::spawn(async move {
                    refresher
                        .await_new_connection(tenant_id, &provider_unique, &shutdown)
                        .await;
                });
            }
            Err(err) => {
                error!(
                    tenant_id = %self.tenant_id,
                    agent_id = %self.agent_id,
                    error = %err,
                    "Pairing succeeded but the connection could not be saved"
                );
                let _ = self.materialized.set(Err(err.to_string()));
            }
        }
    }

    async fn on_error(&self, message: &str, reason: FailureReason) {
        let reason_label = match reason {
            FailureReason::Provider => "provider",
            FailureReason::Timeout => "timeout",
            FailureReason::Unreachable => "unreachable",
        };
        counter!("pairing_failures_total", "reason" => reason_label).increment(1);
        info!(
            tenant_id = %self.tenant_id,
            agent_id = %self.agent_id,
            reason = reason_label,
            detail = message,
            "Pairing attempt ended without a connection"
        );
    }
}

#[derive(Clone)]
pub struct PairingManager {
    provider: Arc<dyn MessagingProvider>,
    service: ConnectionService,
    refresher: StatusRefresher,
    config: PairingConfig,
    shutdown: CancellationToken,
    sessions: Arc<Mutex<HashMap<Uuid, PairingSession>>>,
}

fn lock(
    sessions: &Mutex<HashMap<Uuid, PairingSession>>,
) -> MutexGuard<'_, HashMap<Uuid, PairingSession>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PairingManager {
    pub fn new(
        provider: Arc<dyn MessagingProvider>,
        service: ConnectionService,
        refresher: StatusRefresher,
        config: PairingConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            provider,
            service,
            refresher,
            config,
            shutdown,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Request a pairing code and start polling for it.
    pub async fn start(
        &self,
        tenant_id: Uuid,
        agent_id: Uuid,
        secret: &str,
    ) -> Result<PairingStarted, PairingError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(PairingError::EmptySecret);
        }

        let code = self.provider.request_pairing_code(secret).await?;

        let attempt_id = Uuid::new_v4();
        let cancel = self.shutdown.child_token();
        let (poller, state_rx) = ConnectionPoller::new(
            Arc::clone(&self.provider),
            PairingQuery {
                info_link: code.info_link.clone(),
                secret: secret.to_string(),
                sub_id: PAIRING_SUB_ID.to_string(),
            },
            self.config.poll_interval(),
            self.config.max_attempts,
            cancel.clone(),
        );

        let materialized: Materialized = Arc::new(OnceLock::new());
        let events = SessionEvents {
            service: self.service.clone(),
            refresher: self.refresher.clone(),
            tenant_id,
            agent_id,
            secret: Zeroizing::new(secret.to_string()),
            materialized: Arc::clone(&materialized),
            shutdown: self.shutdown.clone(),
        };

        lock(&self.sessions).insert(
            attempt_id,
            PairingSession {
                tenant_id,
                agent_id,
                state_rx,
                cancel: cancel.clone(),
                task: None,
                materialized,
                created_at: Utc::now(),
            },
        );

        let sessions = Arc::clone(&self.sessions);
        let retention = self.config.session_retention();
        let task = tokio::spawn(async move {
            if let PollerExit::Finished(_) = poller.run(&events).await {
                tokio::select! {
                    _ = sleep(retention) => {}
                    _ = cancel.cancelled() => {}
                }
            }
            let mut sessions = lock(&sessions);
            sessions.remove(&attempt_id);
            gauge!("pairing_sessions_active").set(sessions.len() as f64);
        });

        {
            let mut sessions = lock(&self.sessions);
            if let Some(session) = sessions.get_mut(&attempt_id) {
                session.task = Some(task);
            }
            gauge!("pairing_sessions_active").set(sessions.len() as f64);
        }

        counter!("pairing_attempts_started_total").increment(1);
        info!(
            tenant_id = %tenant_id,
            agent_id = %agent_id,
            attempt_id = %attempt_id,
            "Pairing attempt started"
        );

        Ok(PairingStarted {
            attempt_id,
            qr_image_url: code.qr_image_url,
            info_link: code.info_link,
        })
    }

    pub fn status(&self, tenant_id: Uuid, attempt_id: Uuid) -> Result<PairingSnapshot, PairingError> {
        lock(&self.sessions)
            .get(&attempt_id)
            .filter(|session| session.tenant_id == tenant_id)
            .map(|session| session.snapshot(attempt_id))
            .ok_or(PairingError::NotFound(attempt_id))
    }

    /// Stop an attempt and forget it.
    ///
    /// A status query already in flight completes but its answer is ignored.
    pub fn cancel(&self, tenant_id: Uuid, attempt_id: Uuid) -> Result<(), PairingError> {
        let mut sessions = lock(&self.sessions);
        match sessions.get(&attempt_id) {
            Some(session) if session.tenant_id == tenant_id => {}
            _ => return Err(PairingError::NotFound(attempt_id)),
        }
        if let Some(session) = sessions.remove(&attempt_id) {
            session.cancel.cancel();
        }
        gauge!("pairing_sessions_active").set(sessions.len() as f64);
        info!(tenant_id = %tenant_id, attempt_id = %attempt_id, "Pairing attempt cancelled");
        Ok(())
    }

    pub fn active_sessions(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Cancel every attempt and wait for their tasks to stop.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut sessions = lock(&self.sessions);
            sessions
                .values_mut()
                .filter_map(|session| {
                    session.cancel.cancel();
                    session.task.take()
                })
                .collect()
        };

        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Pairing task ended abnormally");
            }
        }
    }
}
