//! Connection service
//!
//! Creates connections once the provider reports a pairing as complete and
//! carries out the explicit operator actions on them: configure webhook,
//! replace secret, delete.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tracing::{info, warn};
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use super::ConnectionError;
use crate::crypto::{self, CryptoKey, SecretBinding};
use crate::cursor::ConnectionCursor;
use crate::models::connection::{self, ConnectionStatus};
use crate::pairing::machine::{DEFAULT_ERROR_MESSAGE, PAIRING_SUB_ID, PairingSuccess, PollOutcome};
use crate::provider::{MessagingProvider, PairingQuery};
use crate::repositories::{ConnectionRepository, NewConnection, TenantRepository};

/// Outcome label of a single verification query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Waiting,
    Success,
    Error,
}

/// Answer to one verification query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct VerificationResponse {
    pub success: bool,
    pub status: VerificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

#[derive(Clone)]
pub struct ConnectionService {
    connections: ConnectionRepository,
    tenants: TenantRepository,
    crypto_key: CryptoKey,
    provider: Arc<dyn MessagingProvider>,
    webhook_base_url: Option<String>,
}

impl ConnectionService {
    pub fn new(
        connections: ConnectionRepository,
        tenants: TenantRepository,
        crypto_key: CryptoKey,
        provider: Arc<dyn MessagingProvider>,
        webhook_base_url: Option<String>,
    ) -> Self {
        Self {
            connections,
            tenants,
            crypto_key,
            provider,
            webhook_base_url: webhook_base_url.filter(|base| !base.trim().is_empty()),
        }
    }

    pub fn provider(&self) -> &Arc<dyn MessagingProvider> {
        &self.provider
    }

    pub fn repository(&self) -> &ConnectionRepository {
        &self.connections
    }

    /// Plaintext secret of a stored connection, if it has one.
    pub fn open_secret(
        &self,
        connection: &connection::Model,
    ) -> Result<Option<String>, crypto::CryptoError> {
        let Some(sealed) = connection.secret_ciphertext.as_deref().filter(|c| !c.is_empty())
        else {
            return Ok(None);
        };
        crypto::decrypt_secret(&self.crypto_key, &binding(connection), sealed).map(Some)
    }

    /// Persist a connection for a completed pairing.
    ///
    /// The webhook URL is never set here.
    pub async fn materialize(
        &self,
        tenant_id: Uuid,
        agent_id: Uuid,
        secret: &str,
        success: &PairingSuccess,
    ) -> Result<connection::Model, ConnectionError> {
        let id = Uuid::new_v4();
        let sealed = crypto::encrypt_secret(
            &self.crypto_key,
            &SecretBinding {
                tenant_id,
                agent_id,
                connection_id: id,
            },
            secret,
        )?;

        let status = match success.provider_status.as_deref() {
            None => ConnectionStatus::Active,
            label => ConnectionStatus::from_provider_label(label),
        };

        self.tenants.ensure(&tenant_id).await?;
        let created = self
            .connections
            .create(NewConnection {
                id,
                tenant_id,
                agent_id,
                provider_unique: success.provider_unique.clone(),
                secret_ciphertext: Some(sealed),
                sub_id: PAIRING_SUB_ID.to_string(),
                provider_token: success.provider_token.clone(),
                phone_number: Some(success.phone_number.clone()),
                status,
            })
            .await?;

        counter!("connections_materialized_total").increment(1);
        info!(
            tenant_id = %tenant_id,
            agent_id = %agent_id,
            connection_id = %created.id,
            status = %created.status,
            "Connection created from pairing"
        );
        Ok(created)
    }

    /// Query the pairing status once; creates the connection on success.
    pub async fn verify_once(
        &self,
        tenant_id: Uuid,
        agent_id: Uuid,
        query: PairingQuery,
    ) -> Result<VerificationResponse, ConnectionError> {
        if query.secret.trim().is_empty() || query.info_link.trim().is_empty() {
            return Err(ConnectionError::Validation(
                "secret and info_link must not be empty".to_string(),
            ));
        }

        let envelope = self.provider.check_pairing(&query).await?;

        match PollOutcome::from_response(Ok(envelope)) {
            PollOutcome::Connected(success) => {
                let created = self
                    .materialize(tenant_id, agent_id, &query.secret, &success)
                    .await?;
                Ok(VerificationResponse {
                    success: true,
                    status: VerificationStatus::Success,
                    message: None,
                    connection_id: Some(created.id),
                    phone_number: created.phone_number,
                })
            }
            PollOutcome::Rejected(message) => Ok(VerificationResponse {
                success: false,
                status: VerificationStatus::Error,
                message: Some(
                    message
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
                ),
                connection_id: None,
                phone_number: None,
            }),
            PollOutcome::Pending | PollOutcome::Failed(_) => Ok(VerificationResponse {
                success: false,
                status: VerificationStatus::Waiting,
                message: None,
                connection_id: None,
                phone_number: None,
            }),
        }
    }

    /// Build, store and return the inbound webhook URL of a connection.
    ///
    /// Fails before touching the database when no base URL is configured.
    pub async fn configure_webhook(
        &self,
        tenant_id: Uuid,
        connection_id: Uuid,
    ) -> Result<String, ConnectionError> {
        let base = self
            .webhook_base_url
            .as_deref()
            .ok_or(ConnectionError::WebhookBaseUrlMissing)?;
        let webhook_url = build_webhook_url(base, connection_id)?;

        let updated = self
            .connections
            .set_webhook_url(&tenant_id, &connection_id, &webhook_url)
            .await?
            .ok_or(ConnectionError::NotFound(connection_id))?;

        info!(
            tenant_id = %tenant_id,
            connection_id = %updated.id,
            "Webhook URL configured"
        );
        Ok(webhook_url)
    }

    pub async fn update_secret(
        &self,
        tenant_id: Uuid,
        connection_id: Uuid,
        secret: &str,
    ) -> Result<connection::Model, ConnectionError> {
        if secret.trim().is_empty() {
            return Err(ConnectionError::Validation(
                "secret must not be empty".to_string(),
            ));
        }

        let existing = self.get(tenant_id, connection_id).await?;
        let sealed = crypto::encrypt_secret(&self.crypto_key, &binding(&existing), secret)?;

        self.connections
            .update_secret(&tenant_id, &connection_id, sealed)
            .await?
            .ok_or(ConnectionError::NotFound(connection_id))
    }

    /// Delete a connection, asking the provider to drop the account first.
    ///
    /// Provider-side failures are logged and do not block the local delete.
    pub async fn delete(&self, tenant_id: Uuid, connection_id: Uuid) -> Result<(), ConnectionError> {
        let existing = self.get(tenant_id, connection_id).await?;

        match self.open_secret(&existing) {
            Ok(Some(secret)) => {
                if let Err(err) = self
                    .provider
                    .delete_account(&secret, &existing.provider_unique)
                    .await
                {
                    warn!(
                        tenant_id = %tenant_id,
                        connection_id = %connection_id,
                        error = %err,
                        "Provider-side account delete failed; deleting locally"
                    );
                }
            }
            Ok(None) => {}
            Err(err) => warn!(
                tenant_id = %tenant_id,
                connection_id = %connection_id,
                error = %err,
                "Stored secret unreadable; skipping provider-side delete"
            ),
        }

        if !self
            .connections
            .delete_by_id(&tenant_id, &connection_id)
            .await?
        {
            return Err(ConnectionError::NotFound(connection_id));
        }

        info!(tenant_id = %tenant_id, connection_id = %connection_id, "Connection deleted");
        Ok(())
    }

    pub async fn get(
        &self,
        tenant_id: Uuid,
        connection_id: Uuid,
    ) -> Result<connection::Model, ConnectionError> {
        self.connections
            .find_by_id(&tenant_id, &connection_id)
            .await?
            .ok_or(ConnectionError::NotFound(connection_id))
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        limit: u64,
        cursor: Option<&str>,
    ) -> Result<(Vec<connection::Model>, Option<String>), ConnectionError> {
        if let Some(cursor) = cursor {
            ConnectionCursor::decode(cursor).map_err(|_| {
                ConnectionError::Validation("cursor is not valid base64-encoded JSON".to_string())
            })?;
        }

        Ok(self
            .connections
            .list_by_tenant(&tenant_id, limit, cursor)
            .await?)
    }
}

fn binding(connection: &connection::Model) -> SecretBinding {
    SecretBinding {
        tenant_id: connection.tenant_id,
        agent_id: connection.agent_id,
        connection_id: connection.id,
    }
}

/// `{base}/webhooks/whatsapp/{connection_id}`
pub fn build_webhook_url(base: &str, connection_id: Uuid) -> Result<String, ConnectionError> {
    let mut url = Url::parse(base.trim())
        .map_err(|e| ConnectionError::InvalidWebhookBaseUrl(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| ConnectionError::InvalidWebhookBaseUrl(base.to_string()))?
        .pop_if_empty()
        .extend(["webhooks", "whatsapp", &connection_id.to_string()]);
    Ok(url.into())
}
