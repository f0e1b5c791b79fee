//! # Data Models
//!
//! SeaORM entities plus the small response types shared across handlers.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod connection;
pub mod tenant;

pub use connection::{ConnectionStatus, Entity as Connection};
pub use tenant::Entity as Tenant;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "channels".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
