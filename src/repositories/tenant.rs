//! # Tenant Repository
//!
//! Tenants are owned by the CRM; this service only mirrors their ids so that
//! connections have a row to hang off.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, DbErr, EntityTrait, Set};
use uuid::Uuid;

use crate::models::tenant::{self, Entity as Tenant};

#[derive(Debug, Clone)]
pub struct TenantRepository {
    db: Arc<DatabaseConnection>,
}

impl TenantRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find(&self, tenant_id: &Uuid) -> Result<Option<tenant::Model>> {
        Ok(Tenant::find_by_id(*tenant_id).one(&*self.db).await?)
    }

    /// Records the tenant if it has not been seen before
    pub async fn ensure(&self, tenant_id: &Uuid) -> Result<()> {
        let now = Utc::now().fixed_offset();
        let row = tenant::ActiveModel {
            id: Set(*tenant_id),
            name: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let result = Tenant::insert(row)
            .on_conflict(OnConflict::column(tenant::Column::Id).do_nothing().to_owned())
            .exec_without_returning(&*self.db)
            .await;

        match result {
            Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
