//! Connection entity model
//!
//! SeaORM entity for the `connections` table: one row per messaging account
//! the provider reported as paired for a tenant's agent.

use std::fmt;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::tenant::Entity as Tenant;

/// Lifecycle status of a paired account.
///
/// The stored values are the ones the CRM front-end already understands,
/// hence the Portuguese `ativo`/`inativo`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum ConnectionStatus {
    #[sea_orm(string_value = "pending")]
    #[serde(rename = "pending")]
    Pending,
    #[sea_orm(string_value = "ativo")]
    #[serde(rename = "ativo")]
    Active,
    #[sea_orm(string_value = "inativo")]
    #[serde(rename = "inativo")]
    Inactive,
    #[sea_orm(string_value = "error")]
    #[serde(rename = "error")]
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "pending",
            ConnectionStatus::Active => "ativo",
            ConnectionStatus::Inactive => "inativo",
            ConnectionStatus::Error => "error",
        }
    }

    /// Maps the provider's account status onto ours: only `connected` counts as active.
    pub fn from_provider_label(label: Option<&str>) -> Self {
        match label.map(str::trim) {
            Some(label) if label.eq_ignore_ascii_case("connected") => ConnectionStatus::Active,
            _ => ConnectionStatus::Inactive,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Paired messaging account owned by one agent inside one tenant
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connections")]
pub struct Model {
    /// Internal identifier (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning tenant (workspace)
    pub tenant_id: Uuid,

    /// Owning agent
    pub agent_id: Uuid,

    /// Identifier the provider assigned to the paired account
    pub provider_unique: String,

    /// Encrypted provider secret; never returned by the API
    pub secret_ciphertext: Option<Vec<u8>>,

    /// Provider sub-identifier (always "3" for accounts paired here)
    pub sub_id: String,

    /// Optional token handed back by the provider on pairing
    pub provider_token: Option<String>,

    /// Phone number of the paired account
    pub phone_number: Option<String>,

    pub status: ConnectionStatus,

    /// Inbound webhook address, set only by the explicit configure action
    pub webhook_url: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn has_secret(&self) -> bool {
        self.secret_ciphertext
            .as_ref()
            .is_some_and(|cipher| !cipher.is_empty())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Tenant",
        from = "Column::TenantId",
        to = "super::tenant::Column::Id"
    )]
    Tenant,
}

impl Related<Tenant> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
