//! # Connection Status Refresher
//!
//! Re-reads account status from the provider for stored connections. Runs
//! once at startup, then on a fixed interval, on manual request, and as a
//! short follow-up after a new pairing.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{ConnectionError, ConnectionService};
use crate::config::StatusRefreshConfig;
use crate::models::connection::{self, ConnectionStatus};
use crate::provider::{MessagingProvider, ProviderAccount};
use crate::repositories::ConnectionRepository;

/// A stored connection paired with its decrypted secret.
#[derive(Debug, Clone)]
pub struct RefreshEntry {
    pub connection: connection::Model,
    pub secret: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    pub checked: usize,
    pub skipped_without_secret: usize,
    pub failed_secrets: usize,
    pub changed: usize,
    pub persisted: usize,
}

/// Account statuses from one listing, keyed by provider id and by phone.
struct AccountListing {
    by_unique: HashMap<String, Option<String>>,
    by_phone: HashMap<String, Option<String>>,
}

impl AccountListing {
    fn new(accounts: Vec<ProviderAccount>) -> Self {
        let mut by_unique = HashMap::with_capacity(accounts.len());
        let mut by_phone = HashMap::new();
        for account in accounts {
            if let Some(phone) = account.phone.filter(|p| !p.trim().is_empty()) {
                by_phone
                    .entry(phone.trim().to_string())
                    .or_insert_with(|| account.status.clone());
            }
            by_unique.insert(account.unique, account.status);
        }
        Self {
            by_unique,
            by_phone,
        }
    }

    /// Match on the provider id first. Connections paired without one carry
    /// their phone number as `provider_unique`, so fall back to the phone.
    fn status_of(&self, connection: &connection::Model) -> Option<&str> {
        if let Some(status) = self.by_unique.get(&connection.provider_unique) {
            return status.as_deref();
        }
        [
            connection.phone_number.as_deref(),
            Some(connection.provider_unique.as_str()),
        ]
        .into_iter()
        .flatten()
        .find_map(|phone| self.by_phone.get(phone.trim()))
        .and_then(|status| status.as_deref())
    }
}

/// Recompute statuses from the provider's account listings.
///
/// One `list_accounts` call per distinct secret. Entries without a secret, or
/// whose secret's listing failed, come back unchanged. Accounts match on
/// provider id, then on phone number; an account missing from a successful
/// listing counts as not connected.
pub async fn refresh_statuses(
    provider: &dyn MessagingProvider,
    entries: &[RefreshEntry],
) -> (Vec<connection::Model>, RefreshReport) {
    let mut report = RefreshReport::default();

    let mut listings: BTreeMap<&str, Option<AccountListing>> = BTreeMap::new();
    for secret in entries
        .iter()
        .filter_map(|entry| entry.secret.as_deref())
        .filter(|secret| !secret.trim().is_empty())
    {
        if listings.contains_key(secret) {
            continue;
        }
        let listing = match provider.list_accounts(secret).await {
            Ok(accounts) => Some(AccountListing::new(accounts)),
            Err(err) => {
                report.failed_secrets += 1;
                warn!(error = %err, "Account listing failed; leaving its connections unchanged");
                None
            }
        };
        listings.insert(secret, listing);
    }

    let refreshed = entries
        .iter()
        .map(|entry| {
            let mut connection = entry.connection.clone();
            let Some(secret) = entry.secret.as_deref().filter(|s| !s.trim().is_empty()) else {
                report.skipped_without_secret += 1;
                return connection;
            };
            let Some(Some(accounts)) = listings.get(secret) else {
                return connection;
            };

            report.checked += 1;
            let label = accounts.status_of(&connection);
            let status = ConnectionStatus::from_provider_label(label);
            if status != connection.status {
                report.changed += 1;
                connection.status = status;
            }
            connection
        })
        .collect();

    (refreshed, report)
}

/// Write back statuses that changed between `before` and `after`.
///
/// Each write is independent: failures are logged and not retried.
pub async fn persist_statuses(
    repository: &ConnectionRepository,
    before: &[connection::Model],
    after: &[connection::Model],
) -> usize {
    let mut persisted = 0;
    for (old, new) in before.iter().zip(after) {
        if old.id != new.id || old.status == new.status {
            continue;
        }
        match repository
            .update_status(&new.tenant_id, &new.id, new.status)
            .await
        {
            Ok(true) => persisted += 1,
            Ok(false) => debug!(connection_id = %new.id, "Connection vanished before status write"),
            Err(err) => warn!(
                connection_id = %new.id,
                tenant_id = %new.tenant_id,
                error = ?err,
                "Failed to persist refreshed status"
            ),
        }
    }
    persisted
}

#[derive(Clone)]
pub struct StatusRefresher {
    service: ConnectionService,
    config: StatusRefreshConfig,
}

impl StatusRefresher {
    pub fn new(service: ConnectionService, config: StatusRefreshConfig) -> Self {
        Self { service, config }
    }

    /// Run until `shutdown` fires: once immediately, then every tick.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_seconds = self.config.tick_seconds,
            "Starting connection status refresher"
        );
        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Status refresher shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    let started = Instant::now();
                    match self.tick().await {
                        Ok(report) => debug!(?report, "Status refresh tick completed"),
                        Err(err) => error!(error = ?err, "Status refresh tick failed"),
                    }
                    histogram!("status_refresh_tick_duration_ms")
                        .record(started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Status refresher stopped");
    }

    /// Refresh every connection that has a secret, across tenants.
    pub async fn tick(&self) -> Result<RefreshReport, ConnectionError> {
        let connections = self.service.repository().find_all_with_secret().await?;
        let (_, report) = self.refresh_connections(connections).await;
        Ok(report)
    }

    /// Manual refresh of one tenant's connections.
    pub async fn refresh_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<connection::Model>, ConnectionError> {
        let connections = self.service.repository().find_by_tenant(&tenant_id).await?;
        let (refreshed, report) = self.refresh_connections(connections).await;
        info!(tenant_id = %tenant_id, ?report, "Manual status refresh completed");
        Ok(refreshed)
    }

    /// Look for a newly paired connection a few times, refreshing it once found.
    ///
    /// Gives up silently after the configured number of lookups.
    pub async fn await_new_connection(
        &self,
        tenant_id: Uuid,
        provider_unique: &str,
        cancel: &CancellationToken,
    ) -> Option<connection::Model> {
        for attempt in 1..=self.config.follow_up_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = sleep(self.config.follow_up_spacing()) => {}
            }

            match self
                .service
                .repository()
                .find_by_provider_unique(&tenant_id, provider_unique)
                .await
            {
                Ok(Some(found)) => {
                    let (mut refreshed, _) = self.refresh_connections(vec![found]).await;
                    return refreshed.pop();
                }
                Ok(None) => debug!(attempt, "New connection not visible yet"),
                Err(err) => debug!(attempt, error = ?err, "Follow-up lookup failed"),
            }
        }

        debug!(tenant_id = %tenant_id, "Follow-up refresh gave up");
        None
    }

    async fn refresh_connections(
        &self,
        connections: Vec<connection::Model>,
    ) -> (Vec<connection::Model>, RefreshReport) {
        let entries: Vec<RefreshEntry> = connections
            .into_iter()
            .map(|connection| {
                let secret = match self.service.open_secret(&connection) {
                    Ok(secret) => secret,
                    Err(err) => {
                        warn!(
                            connection_id = %connection.id,
                            error = %err,
                            "Stored secret unreadable; skipping connection"
                        );
                        None
                    }
                };
                RefreshEntry { connection, secret }
            })
            .collect();

        let (refreshed, mut report) =
            refresh_statuses(self.service.provider().as_ref(), &entries).await;

        let before: Vec<_> = entries.into_iter().map(|entry| entry.connection).collect();
        report.persisted = persist_statuses(self.service.repository(), &before, &refreshed).await;

        counter!("status_refresh_checked_total").increment(report.checked as u64);
        counter!("status_refresh_changed_total").increment(report.changed as u64);
        (refreshed, report)
    }
}
