//! # Cursor Utilities
//!
//! Opaque keyset cursors for connection listings. A cursor is base64 JSON of
//! the `(created_at, id)` pair of the last returned row.

use base64::Engine;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const MAX_CURSOR_LEN: usize = 512;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor is too long")]
    TooLong,
    #[error("cursor contains invalid characters")]
    InvalidCharacters,
    #[error("cursor is not valid base64")]
    InvalidBase64,
    #[error("cursor contains invalid JSON structure")]
    InvalidJson,
}

/// Position after the last row of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCursor {
    pub created_at: DateTime<FixedOffset>,
    pub id: Uuid,
}

impl ConnectionCursor {
    pub fn new(created_at: DateTime<FixedOffset>, id: Uuid) -> Self {
        Self { created_at, id }
    }

    pub fn encode(&self) -> String {
        let json = serde_json::json!({
            "created_at": self.created_at.to_rfc3339(),
            "id": self.id,
        });
        base64::engine::general_purpose::STANDARD.encode(json.to_string().as_bytes())
    }

    pub fn decode(cursor: &str) -> Result<Self, CursorError> {
        if cursor.len() > MAX_CURSOR_LEN {
            return Err(CursorError::TooLong);
        }
        if !cursor
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=')
        {
            return Err(CursorError::InvalidCharacters);
        }

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(cursor)
            .map_err(|_| CursorError::InvalidBase64)?;

        serde_json::from_slice(&decoded).map_err(|_| CursorError::InvalidJson)
    }
}
