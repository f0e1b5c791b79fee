//! Test utilities shared by the integration tests.
//!
//! In-memory SQLite with migrations applied, a scripted messaging provider,
//! and builders for the connection services on top of them.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use channels::config::StatusRefreshConfig;
use channels::connections::{ConnectionService, StatusRefresher};
use channels::crypto::CryptoKey;
use channels::models::connection;
use channels::pairing::PairingSuccess;
use channels::provider::{
    MessagingProvider, PairingCode, PairingQuery, PairingStatusData, ProviderAccount,
    ProviderEnvelope, ProviderError, ProviderStatus,
};
use channels::repositories::{ConnectionRepository, TenantRepository};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![42u8; 32]).expect("32-byte key")
}

pub fn connection_service(
    db: &DatabaseConnection,
    provider: Arc<FakeProvider>,
    webhook_base_url: Option<&str>,
) -> ConnectionService {
    let db = Arc::new(db.clone());
    ConnectionService::new(
        ConnectionRepository::new(Arc::clone(&db)),
        TenantRepository::new(db),
        test_crypto_key(),
        provider,
        webhook_base_url.map(str::to_owned),
    )
}

/// Refresher with short follow-up spacing, for paused-clock tests.
pub fn status_refresher(service: &ConnectionService) -> StatusRefresher {
    StatusRefresher::new(
        service.clone(),
        StatusRefreshConfig {
            tick_seconds: 60,
            follow_up_attempts: 5,
            follow_up_spacing_ms: 2000,
        },
    )
}

/// Persist a connection the way a completed pairing would.
pub async fn paired_connection(
    service: &ConnectionService,
    tenant_id: Uuid,
    secret: &str,
    provider_unique: &str,
) -> Result<connection::Model> {
    let success = PairingSuccess {
        provider_unique: provider_unique.to_string(),
        phone_number: format!("55119{provider_unique}"),
        provider_token: None,
        provider_status: None,
    };
    Ok(service
        .materialize(tenant_id, Uuid::new_v4(), secret, &success)
        .await?)
}

pub fn pending_envelope() -> ProviderEnvelope<PairingStatusData> {
    ProviderEnvelope {
        status: Some(ProviderStatus::Code(200)),
        message: None,
        data: Some(PairingStatusData {
            connected: Some(false),
            ..Default::default()
        }),
    }
}

pub fn connected_envelope(phone: &str, unique: &str) -> ProviderEnvelope<PairingStatusData> {
    ProviderEnvelope {
        status: Some(ProviderStatus::Code(200)),
        message: None,
        data: Some(PairingStatusData {
            connected: Some(true),
            number: Some(phone.to_string()),
            unique: Some(unique.to_string()),
            ..Default::default()
        }),
    }
}

pub fn error_envelope(message: &str) -> ProviderEnvelope<PairingStatusData> {
    ProviderEnvelope {
        status: Some(ProviderStatus::Label("error".to_string())),
        message: Some(message.to_string()),
        data: None,
    }
}

pub fn account(unique: &str, status: &str) -> ProviderAccount {
    ProviderAccount {
        unique: unique.to_string(),
        phone: None,
        status: Some(status.to_string()),
    }
}

type StatusReply = Result<ProviderEnvelope<PairingStatusData>, ProviderError>;

/// Scripted provider.
///
/// Pairing status answers are consumed in order; once the script runs out the
/// provider keeps answering "not connected yet".
#[derive(Default)]
pub struct FakeProvider {
    status_script: Mutex<VecDeque<StatusReply>>,
    accounts: Mutex<HashMap<String, Result<Vec<ProviderAccount>, ProviderError>>>,
    fail_pairing_code: Mutex<Option<ProviderError>>,
    fail_delete: Mutex<Option<ProviderError>>,
    pub code_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_status(&self, reply: StatusReply) {
        self.status_script.lock().unwrap().push_back(reply);
    }

    pub fn push_pending(&self, count: usize) {
        for _ in 0..count {
            self.push_status(Ok(pending_envelope()));
        }
    }

    pub fn set_accounts(&self, secret: &str, accounts: Result<Vec<ProviderAccount>, ProviderError>) {
        self.accounts
            .lock()
            .unwrap()
            .insert(secret.to_string(), accounts);
    }

    pub fn fail_pairing_code_with(&self, error: ProviderError) {
        *self.fail_pairing_code.lock().unwrap() = Some(error);
    }

    pub fn fail_delete_with(&self, error: ProviderError) {
        *self.fail_delete.lock().unwrap() = Some(error);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.code_calls.load(Ordering::SeqCst)
            + self.status_calls()
            + self.list_calls()
            + self.delete_calls()
    }
}

#[async_trait]
impl MessagingProvider for FakeProvider {
    async fn request_pairing_code(&self, secret: &str) -> Result<PairingCode, ProviderError> {
        self.code_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_pairing_code.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(PairingCode {
            qr_image_url: format!("https://provider.test/qr/{secret}.png"),
            info_link: format!("info-{secret}"),
        })
    }

    async fn check_pairing(&self, _query: &PairingQuery) -> StatusReply {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(pending_envelope()))
    }

    async fn list_accounts(&self, secret: &str) -> Result<Vec<ProviderAccount>, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.accounts
            .lock()
            .unwrap()
            .get(secret)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn delete_account(
        &self,
        _secret: &str,
        _provider_unique: &str,
    ) -> Result<(), ProviderError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        match self.fail_delete.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
