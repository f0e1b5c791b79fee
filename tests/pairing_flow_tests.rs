//! End-to-end pairing flow: code request, polling, terminal callbacks and the
//! connection created on success.

mod test_utils;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use channels::config::PairingConfig;
use channels::models::ConnectionStatus;
use channels::pairing::{
    AttemptStatus, ConnectionPoller, DEFAULT_ERROR_MESSAGE, FailureReason, MAX_ATTEMPTS,
    POLL_INTERVAL, PairingError, PairingEvents, PairingManager, PairingState, PairingSuccess,
    PollerExit, TIMEOUT_MESSAGE,
};
use channels::provider::{PairingQuery, ProviderError};
use test_utils::{
    FakeProvider, account, connected_envelope, connection_service, error_envelope, setup_test_db,
};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Default)]
struct RecordingEvents {
    successes: Mutex<Vec<PairingSuccess>>,
    errors: Mutex<Vec<(String, FailureReason)>>,
}

#[async_trait]
impl PairingEvents for RecordingEvents {
    async fn on_success(&self, success: &PairingSuccess) {
        self.successes.lock().unwrap().push(success.clone());
    }

    async fn on_error(&self, message: &str, reason: FailureReason) {
        self.errors.lock().unwrap().push((message.to_string(), reason));
    }
}

fn query() -> PairingQuery {
    PairingQuery {
        info_link: "info-abc".to_string(),
        secret: "secret-1".to_string(),
        sub_id: "3".to_string(),
    }
}

fn poller(
    provider: &Arc<FakeProvider>,
    cancel: CancellationToken,
) -> (ConnectionPoller, tokio::sync::watch::Receiver<PairingState>) {
    ConnectionPoller::new(
        provider.clone(),
        query(),
        POLL_INTERVAL,
        MAX_ATTEMPTS,
        cancel,
    )
}

#[tokio::test(start_paused = true)]
async fn success_stops_polling_and_fires_once() {
    let provider = FakeProvider::new();
    provider.push_pending(2);
    provider.push_status(Ok(connected_envelope("5511999990000", "acc-1")));

    let events = RecordingEvents::default();
    let (poller, state_rx) = poller(&provider, CancellationToken::new());
    let started = Instant::now();

    let exit = poller.run(&events).await;

    assert_eq!(started.elapsed(), POLL_INTERVAL * 3);
    assert_eq!(provider.status_calls(), 3);
    let successes = events.successes.lock().unwrap();
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].phone_number, "5511999990000");
    assert_eq!(successes[0].provider_unique, "acc-1");
    assert!(events.errors.lock().unwrap().is_empty());
    assert!(matches!(exit, PollerExit::Finished(PairingState::Success(_))));
    assert!(matches!(&*state_rx.borrow(), PairingState::Success(_)));

    sleep(POLL_INTERVAL * 10).await;
    assert_eq!(provider.status_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn explicit_provider_error_surfaces_message() {
    let provider = FakeProvider::new();
    provider.push_pending(1);
    provider.push_status(Ok(error_envelope("expired")));

    let events = RecordingEvents::default();
    let (poller, _state_rx) = poller(&provider, CancellationToken::new());
    let exit = poller.run(&events).await;

    assert_eq!(
        exit,
        PollerExit::Finished(PairingState::Error {
            message: "expired".to_string(),
            reason: FailureReason::Provider,
        })
    );
    assert_eq!(
        *events.errors.lock().unwrap(),
        vec![("expired".to_string(), FailureReason::Provider)]
    );
    assert!(events.successes.lock().unwrap().is_empty());
    assert_eq!(provider.status_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn unreachable_provider_ends_with_default_message() {
    let provider = FakeProvider::new();
    provider.push_status(Err(ProviderError::Transport("connection refused".to_string())));

    let events = RecordingEvents::default();
    let (poller, _state_rx) = poller(&provider, CancellationToken::new());
    let exit = poller.run(&events).await;

    assert_eq!(
        exit,
        PollerExit::Finished(PairingState::Error {
            message: DEFAULT_ERROR_MESSAGE.to_string(),
            reason: FailureReason::Unreachable,
        })
    );
    assert_eq!(provider.status_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn times_out_on_the_thirty_first_tick_never_earlier() {
    let provider = FakeProvider::new();
    let events = Arc::new(RecordingEvents::default());
    let (poller, state_rx) = poller(&provider, CancellationToken::new());

    let task = tokio::spawn({
        let events = Arc::clone(&events);
        async move { poller.run(events.as_ref()).await }
    });

    // Just past the 30th tick
    sleep(POLL_INTERVAL * MAX_ATTEMPTS + Duration::from_millis(500)).await;
    assert_eq!(provider.status_calls(), MAX_ATTEMPTS as usize);
    assert_eq!(
        *state_rx.borrow(),
        PairingState::Waiting {
            attempts: MAX_ATTEMPTS
        }
    );
    assert!(events.errors.lock().unwrap().is_empty());

    let exit = task.await.unwrap();
    assert_eq!(provider.status_calls(), MAX_ATTEMPTS as usize + 1);
    assert_eq!(
        exit,
        PollerExit::Finished(PairingState::Error {
            message: TIMEOUT_MESSAGE.to_string(),
            reason: FailureReason::Timeout,
        })
    );
    assert_eq!(events.errors.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_poller_stops_without_callbacks() {
    let provider = FakeProvider::new();
    let cancel = CancellationToken::new();
    let events = Arc::new(RecordingEvents::default());
    let (poller, _state_rx) = poller(&provider, cancel.clone());

    let task = tokio::spawn({
        let events = Arc::clone(&events);
        async move { poller.run(events.as_ref()).await }
    });

    sleep(POLL_INTERVAL * 3 + Duration::from_millis(100)).await;
    cancel.cancel();
    assert_eq!(task.await.unwrap(), PollerExit::Cancelled);

    let calls = provider.status_calls();
    assert_eq!(calls, 3);
    sleep(POLL_INTERVAL * 5).await;
    assert_eq!(provider.status_calls(), calls);
    assert!(events.successes.lock().unwrap().is_empty());
    assert!(events.errors.lock().unwrap().is_empty());
}

fn fast_pairing() -> PairingConfig {
    PairingConfig {
        poll_interval_ms: 10,
        max_attempts: MAX_ATTEMPTS,
        session_retention_seconds: 300,
    }
}

async fn manager(provider: &Arc<FakeProvider>) -> (PairingManager, channels::connections::ConnectionService) {
    manager_with(provider, fast_pairing()).await
}

async fn manager_with(
    provider: &Arc<FakeProvider>,
    pairing: PairingConfig,
) -> (PairingManager, channels::connections::ConnectionService) {
    let db = setup_test_db().await.unwrap();
    let service = connection_service(&db, provider.clone(), None);
    let refresher = channels::connections::StatusRefresher::new(
        service.clone(),
        channels::config::StatusRefreshConfig {
            tick_seconds: 60,
            follow_up_attempts: 5,
            follow_up_spacing_ms: 10,
        },
    );
    let manager = PairingManager::new(
        provider.clone(),
        service.clone(),
        refresher,
        pairing,
        CancellationToken::new(),
    );
    (manager, service)
}

async fn wait_for_terminal(
    manager: &PairingManager,
    tenant_id: Uuid,
    attempt_id: Uuid,
) -> channels::pairing::PairingSnapshot {
    for _ in 0..300 {
        let snapshot = manager.status(tenant_id, attempt_id).unwrap();
        let settled = match snapshot.status {
            AttemptStatus::Waiting => false,
            AttemptStatus::Success => snapshot.connection_id.is_some() || snapshot.message.is_some(),
            AttemptStatus::Error => true,
        };
        if settled {
            return snapshot;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("pairing attempt did not settle");
}

#[tokio::test]
async fn successful_pairing_creates_active_connection() {
    let provider = FakeProvider::new();
    provider.push_pending(2);
    provider.push_status(Ok(connected_envelope("5511999990000", "acc-1")));
    provider.set_accounts("secret-1", Ok(vec![account("acc-1", "connected")]));

    let (manager, service) = manager(&provider).await;
    let tenant_id = Uuid::new_v4();
    let agent_id = Uuid::new_v4();

    let started = manager.start(tenant_id, agent_id, "secret-1").await.unwrap();
    assert_eq!(started.info_link, "info-secret-1");

    let snapshot = wait_for_terminal(&manager, tenant_id, started.attempt_id).await;
    assert_eq!(snapshot.status, AttemptStatus::Success);
    assert_eq!(snapshot.phone_number.as_deref(), Some("5511999990000"));

    let connection = service
        .get(tenant_id, snapshot.connection_id.unwrap())
        .await
        .unwrap();
    assert_eq!(connection.status, ConnectionStatus::Active);
    assert_eq!(connection.phone_number.as_deref(), Some("5511999990000"));
    assert_eq!(connection.agent_id, agent_id);
    assert_eq!(connection.sub_id, "3");
    assert!(connection.webhook_url.is_none());
    assert_eq!(
        service.open_secret(&connection).unwrap().as_deref(),
        Some("secret-1")
    );

    // No status queries after success
    sleep(Duration::from_millis(100)).await;
    assert_eq!(provider.status_calls(), 3);
}

#[tokio::test]
async fn expired_pairing_creates_nothing() {
    let provider = FakeProvider::new();
    provider.push_status(Ok(error_envelope("expired")));

    let (manager, service) = manager(&provider).await;
    let tenant_id = Uuid::new_v4();

    let started = manager
        .start(tenant_id, Uuid::new_v4(), "secret-1")
        .await
        .unwrap();
    let snapshot = wait_for_terminal(&manager, tenant_id, started.attempt_id).await;

    assert_eq!(snapshot.status, AttemptStatus::Error);
    assert_eq!(snapshot.message.as_deref(), Some("expired"));
    assert_eq!(snapshot.reason, Some(FailureReason::Provider));
    let (connections, _) = service.list(tenant_id, 50, None).await.unwrap();
    assert!(connections.is_empty());
}

#[tokio::test]
async fn cancel_forgets_attempt_and_stops_polling() {
    let provider = FakeProvider::new();
    let (manager, _service) = manager(&provider).await;
    let tenant_id = Uuid::new_v4();

    let started = manager
        .start(tenant_id, Uuid::new_v4(), "secret-1")
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    manager.cancel(tenant_id, started.attempt_id).unwrap();
    assert!(matches!(
        manager.status(tenant_id, started.attempt_id),
        Err(PairingError::NotFound(_))
    ));
    assert_eq!(manager.active_sessions(), 0);

    // Let an in-flight query drain, then expect silence
    sleep(Duration::from_millis(20)).await;
    let calls = provider.status_calls();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(provider.status_calls(), calls);
}

#[tokio::test]
async fn attempts_are_scoped_to_their_tenant() {
    let provider = FakeProvider::new();
    let (manager, _service) = manager(&provider).await;
    let tenant_id = Uuid::new_v4();

    let started = manager
        .start(tenant_id, Uuid::new_v4(), "secret-1")
        .await
        .unwrap();

    let other_tenant = Uuid::new_v4();
    assert!(matches!(
        manager.status(other_tenant, started.attempt_id),
        Err(PairingError::NotFound(_))
    ));
    assert!(manager.cancel(other_tenant, started.attempt_id).is_err());
    assert!(manager.status(tenant_id, started.attempt_id).is_ok());

    manager.shutdown().await;
}

#[tokio::test]
async fn code_request_failure_starts_nothing() {
    let provider = FakeProvider::new();
    provider.fail_pairing_code_with(ProviderError::Http {
        status: 503,
        body: None,
    });
    let (manager, _service) = manager(&provider).await;

    let result = manager.start(Uuid::new_v4(), Uuid::new_v4(), "secret-1").await;
    assert!(matches!(result, Err(PairingError::Provider(_))));
    assert_eq!(manager.active_sessions(), 0);
    assert_eq!(provider.status_calls(), 0);
}

#[tokio::test]
async fn shutdown_stops_every_attempt() {
    let provider = FakeProvider::new();
    let (manager, _service) = manager(&provider).await;
    let tenant_id = Uuid::new_v4();

    for _ in 0..3 {
        manager
            .start(tenant_id, Uuid::new_v4(), "secret-1")
            .await
            .unwrap();
    }
    sleep(Duration::from_millis(30)).await;

    manager.shutdown().await;
    assert_eq!(manager.active_sessions(), 0);

    let calls = provider.status_calls();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(provider.status_calls(), calls);
}

#[tokio::test]
async fn finished_attempts_are_reaped_after_retention() {
    let provider = FakeProvider::new();
    provider.push_status(Ok(error_envelope("expired")));
    let (manager, _service) = manager_with(
        &provider,
        PairingConfig {
            session_retention_seconds: 0,
            ..fast_pairing()
        },
    )
    .await;
    let tenant_id = Uuid::new_v4();

    let started = manager
        .start(tenant_id, Uuid::new_v4(), "secret-1")
        .await
        .unwrap();

    for _ in 0..100 {
        if manager.active_sessions() == 0 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(manager.active_sessions(), 0);
    assert!(matches!(
        manager.status(tenant_id, started.attempt_id),
        Err(PairingError::NotFound(_))
    ));
    assert_eq!(provider.status_calls(), 1);
}
