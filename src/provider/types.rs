//! Response shapes for the messaging provider API.
//!
//! The provider answers with loosely typed JSON. Everything is parsed into the
//! types below at the client boundary; unknown fields are dropped and absent or
//! mistyped optional fields become `None`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// `status` field of a provider envelope: either an HTTP-like code or a free label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProviderStatus {
    Code(u16),
    Label(String),
}

impl ProviderStatus {
    /// Numeric code, including labels that carry a number (`"200"`).
    pub fn code(&self) -> Option<u16> {
        match self {
            ProviderStatus::Code(code) => Some(*code),
            ProviderStatus::Label(label) => label.trim().parse().ok(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code() == Some(200)
    }

    /// Whether the provider explicitly reported a failure.
    ///
    /// Labels `error` and `failed` or any code >= 400.
    pub fn is_explicit_error(&self) -> bool {
        if let Some(code) = self.code() {
            return code >= 400;
        }
        match self {
            ProviderStatus::Label(label) => {
                let label = label.trim();
                label.eq_ignore_ascii_case("error") || label.eq_ignore_ascii_case("failed")
            }
            ProviderStatus::Code(_) => false,
        }
    }
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderStatus::Code(code) => write!(f, "{code}"),
            ProviderStatus::Label(label) => f.write_str(label),
        }
    }
}

impl<'de> Deserialize<'de> for ProviderStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_u64()
                .and_then(|code| u16::try_from(code).ok())
                .map(ProviderStatus::Code)
                .unwrap_or_else(|| ProviderStatus::Label(n.to_string())),
            Value::String(label) => ProviderStatus::Label(label),
            other => ProviderStatus::Label(other.to_string()),
        })
    }
}

/// Common `{status, message, data}` wrapper around every provider answer.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ProviderEnvelope<T> {
    #[serde(default)]
    pub status: Option<ProviderStatus>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient_data")]
    pub data: Option<T>,
}

impl<T> ProviderEnvelope<T> {
    pub fn is_ok(&self) -> bool {
        self.status.as_ref().is_some_and(ProviderStatus::is_ok)
    }

    pub fn is_explicit_error(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(ProviderStatus::is_explicit_error)
    }
}

/// Payload of `POST /pairing/code`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PairingCodeData {
    #[serde(default, alias = "qrimagelink", alias = "qrImageUrl", deserialize_with = "lenient_string")]
    pub qr_image_url: Option<String>,
    #[serde(default, alias = "infolink", alias = "infoLink", deserialize_with = "lenient_string")]
    pub info_link: Option<String>,
}

/// A freshly issued pairing code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PairingCode {
    /// Image URL of the scannable code
    pub qr_image_url: String,
    /// Opaque token used to poll the pairing status
    pub info_link: String,
}

/// Parameters of one pairing status query.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct PairingQuery {
    pub info_link: String,
    pub secret: String,
    #[serde(rename = "sid")]
    pub sub_id: String,
}

impl fmt::Debug for PairingQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingQuery")
            .field("info_link", &self.info_link)
            .field("secret", &"[REDACTED]")
            .field("sub_id", &self.sub_id)
            .finish()
    }
}

/// Payload of `POST /pairing/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PairingStatusData {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub connected: Option<bool>,
    #[serde(default, alias = "phone", alias = "phone_number", deserialize_with = "lenient_string")]
    pub number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub unique: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub token: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
}

/// One account returned by `GET /accounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAccount {
    pub unique: String,
    pub phone: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawAccount {
    #[serde(default, deserialize_with = "lenient_string")]
    unique: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    phone: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    status: Option<String>,
}

impl RawAccount {
    /// Entries without an identifier cannot be matched and are dropped.
    pub(crate) fn into_account(self) -> Option<ProviderAccount> {
        let unique = self
            .unique
            .or(self.id)
            .filter(|u| !u.trim().is_empty())?;
        Some(ProviderAccount {
            unique,
            phone: self.phone.or(self.number),
            status: self.status,
        })
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => Some(b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_u64().map(|v| v != 0),
        _ => None,
    })
}

// A `data` field of the wrong shape is treated as absent rather than failing
// the whole envelope.
fn lenient_data<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    Ok(T::deserialize(value).ok())
}
