//! reqwest-backed messaging provider client

use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use super::types::{PairingCodeData, RawAccount};
use super::{
    MessagingProvider, PairingCode, PairingQuery, PairingStatusData, ProviderAccount,
    ProviderEnvelope, ProviderError,
};
use crate::config::ProviderConfig;

const USER_AGENT: &str = "Channels/0.1";
const BODY_SNIPPET_CHARS: usize = 512;

/// HTTP client for the messaging provider API.
#[derive(Debug, Clone)]
pub struct HttpMessagingProvider {
    client: reqwest::Client,
    base: Url,
}

impl HttpMessagingProvider {
    pub fn new(base: Url, timeout: Duration) -> anyhow::Result<Self> {
        if base.cannot_be_a_base() {
            anyhow::bail!("provider api base '{base}' cannot carry a path");
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, base })
    }

    pub fn from_config(config: &ProviderConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&config.api_base)?;
        Self::new(base, config.timeout())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::Transport(format!("invalid provider base {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<(reqwest::StatusCode, String), ProviderError> {
        let started = Instant::now();
        let result = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        }
        .await;

        histogram!("provider_request_duration_ms", "operation" => operation)
            .record(started.elapsed().as_millis() as f64);

        match result {
            Ok((status, body)) => {
                counter!(
                    "provider_requests_total",
                    "operation" => operation,
                    "result" => if status.is_success() { "ok" } else { "http_error" }
                )
                .increment(1);
                debug!(operation, status = status.as_u16(), "Provider responded");
                Ok((status, body))
            }
            Err(err) => {
                counter!("provider_requests_total", "operation" => operation, "result" => "transport_error")
                    .increment(1);
                warn!(operation, error = %err, "Provider request failed");
                Err(err.into())
            }
        }
    }
}

/// Parse a provider envelope, keeping error statuses that still carry one.
fn parse_envelope<T: DeserializeOwned>(
    status: reqwest::StatusCode,
    body: &str,
) -> Result<ProviderEnvelope<T>, ProviderError> {
    match serde_json::from_str::<ProviderEnvelope<T>>(body) {
        Ok(envelope) if status.is_success() || envelope.status.is_some() => Ok(envelope),
        Ok(_) => Err(http_error(status, body)),
        Err(_) if !status.is_success() => Err(http_error(status, body)),
        Err(err) => Err(ProviderError::Malformed(err.to_string())),
    }
}

fn http_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
    let body = body.trim();
    ProviderError::Http {
        status: status.as_u16(),
        body: (!body.is_empty()).then(|| body.chars().take(BODY_SNIPPET_CHARS).collect()),
    }
}

fn rejected<T>(envelope: ProviderEnvelope<T>) -> ProviderError {
    ProviderError::Rejected {
        message: envelope.message,
    }
}

#[async_trait]
impl MessagingProvider for HttpMessagingProvider {
    async fn request_pairing_code(&self, secret: &str) -> Result<PairingCode, ProviderError> {
        let url = self.endpoint(&["pairing", "code"])?;
        let (status, body) = self
            .send(
                "pairing_code",
                self.client.post(url).json(&json!({ "secret": secret })),
            )
            .await?;

        let envelope: ProviderEnvelope<PairingCodeData> = parse_envelope(status, &body)?;
        if !envelope.is_ok() {
            return Err(rejected(envelope));
        }

        let data = envelope.data.unwrap_or_default();
        match (data.qr_image_url, data.info_link) {
            (Some(qr_image_url), Some(info_link)) => Ok(PairingCode {
                qr_image_url,
                info_link,
            }),
            _ => Err(ProviderError::Malformed(
                "pairing code response is missing qr_image_url or info_link".to_string(),
            )),
        }
    }

    async fn check_pairing(
        &self,
        query: &PairingQuery,
    ) -> Result<ProviderEnvelope<PairingStatusData>, ProviderError> {
        let url = self.endpoint(&["pairing", "status"])?;
        let (status, body) = self
            .send("pairing_status", self.client.post(url).json(query))
            .await?;
        parse_envelope(status, &body)
    }

    async fn list_accounts(&self, secret: &str) -> Result<Vec<ProviderAccount>, ProviderError> {
        let mut url = self.endpoint(&["accounts"])?;
        url.query_pairs_mut().append_pair("secret", secret);

        let (status, body) = self.send("list_accounts", self.client.get(url)).await?;
        let envelope: ProviderEnvelope<Vec<RawAccount>> = parse_envelope(status, &body)?;
        if !envelope.is_ok() {
            return Err(rejected(envelope));
        }

        Ok(envelope
            .data
            .unwrap_or_default()
            .into_iter()
            .filter_map(RawAccount::into_account)
            .collect())
    }

    async fn delete_account(
        &self,
        secret: &str,
        provider_unique: &str,
    ) -> Result<(), ProviderError> {
        let mut url = self.endpoint(&["accounts", provider_unique])?;
        url.query_pairs_mut().append_pair("secret", secret);

        let (status, body) = self.send("delete_account", self.client.delete(url)).await?;
        if !status.is_success() {
            return Err(http_error(status, &body));
        }

        // Empty or non-envelope bodies on 2xx count as success
        match serde_json::from_str::<ProviderEnvelope<serde_json::Value>>(&body) {
            Ok(envelope) if envelope.is_explicit_error() => Err(rejected(envelope)),
            _ => Ok(()),
        }
    }
}
