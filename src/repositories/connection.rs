//! Connection repository for database operations
//!
//! Tenant-scoped SeaORM access to the `connections` table with keyset
//! pagination over `(created_at, id)`.

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::cursor::ConnectionCursor;
use crate::models::connection::{self, ConnectionStatus, Entity as Connection};

/// Fields of a connection created after a successful pairing
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub provider_unique: String,
    pub secret_ciphertext: Option<Vec<u8>>,
    pub sub_id: String,
    pub provider_token: Option<String>,
    pub phone_number: Option<String>,
    pub status: ConnectionStatus,
}

/// Repository for connection database operations
#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    pub db: Arc<DatabaseConnection>,
}

impl ConnectionRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts a connection; the webhook URL always starts unset
    pub async fn create(&self, new: NewConnection) -> Result<connection::Model> {
        let now = Utc::now().fixed_offset();
        let id = new.id;

        connection::ActiveModel {
            id: Set(new.id),
            tenant_id: Set(new.tenant_id),
            agent_id: Set(new.agent_id),
            provider_unique: Set(new.provider_unique),
            secret_ciphertext: Set(new.secret_ciphertext),
            sub_id: Set(new.sub_id),
            provider_token: Set(new.provider_token),
            phone_number: Set(new.phone_number),
            status: Set(new.status),
            webhook_url: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        // For SQLite, query the record directly since we already know the ID
        Connection::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| anyhow!("connection not persisted"))
    }

    /// Finds a connection by its ID within a tenant scope
    pub async fn find_by_id(&self, tenant_id: &Uuid, id: &Uuid) -> Result<Option<connection::Model>> {
        Ok(Connection::find_by_id(*id)
            .filter(connection::Column::TenantId.eq(*tenant_id))
            .one(&*self.db)
            .await?)
    }

    /// Most recent connection carrying the given provider identifier
    pub async fn find_by_provider_unique(
        &self,
        tenant_id: &Uuid,
        provider_unique: &str,
    ) -> Result<Option<connection::Model>> {
        Ok(Connection::find()
            .filter(connection::Column::TenantId.eq(*tenant_id))
            .filter(connection::Column::ProviderUnique.eq(provider_unique))
            .order_by_desc(connection::Column::CreatedAt)
            .one(&*self.db)
            .await?)
    }

    /// Lists all connections for a tenant ordered by creation time then ID
    pub async fn find_by_tenant(&self, tenant_id: &Uuid) -> Result<Vec<connection::Model>> {
        Ok(Connection::find()
            .filter(connection::Column::TenantId.eq(*tenant_id))
            .order_by_asc(connection::Column::CreatedAt)
            .order_by_asc(connection::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Lists every connection that has a stored secret, across tenants
    pub async fn find_all_with_secret(&self) -> Result<Vec<connection::Model>> {
        Ok(Connection::find()
            .filter(connection::Column::SecretCiphertext.is_not_null())
            .order_by_asc(connection::Column::TenantId)
            .order_by_asc(connection::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Lists connections for a tenant with cursor pagination
    pub async fn list_by_tenant(
        &self,
        tenant_id: &Uuid,
        limit: u64,
        cursor: Option<&str>,
    ) -> Result<(Vec<connection::Model>, Option<String>)> {
        if limit == 0 {
            return Ok((Vec::new(), cursor.map(str::to_owned)));
        }

        let mut query = Connection::find()
            .filter(connection::Column::TenantId.eq(*tenant_id))
            .order_by_asc(connection::Column::CreatedAt)
            .order_by_asc(connection::Column::Id);

        if let Some(cursor) = cursor
            && !cursor.is_empty()
        {
            let position = ConnectionCursor::decode(cursor)
                .map_err(|e| anyhow!("Invalid cursor format: {e}"))?;
            query = query.filter(
                Condition::any()
                    .add(connection::Column::CreatedAt.gt(position.created_at))
                    .add(
                        Condition::all()
                            .add(connection::Column::CreatedAt.eq(position.created_at))
                            .add(connection::Column::Id.gt(position.id)),
                    ),
            );
        }

        let mut rows = query.limit(limit + 1).all(&*self.db).await?;

        let next_cursor = if rows.len() as u64 > limit {
            rows.truncate(limit as usize);
            rows.last()
                .map(|last| ConnectionCursor::new(last.created_at, last.id).encode())
        } else {
            None
        };

        Ok((rows, next_cursor))
    }

    /// Writes a refreshed status; returns whether a row was touched
    pub async fn update_status(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
        status: ConnectionStatus,
    ) -> Result<bool> {
        let result = Connection::update_many()
            .col_expr(connection::Column::Status, Expr::value(status.as_str()))
            .col_expr(
                connection::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(connection::Column::TenantId.eq(*tenant_id))
            .filter(connection::Column::Id.eq(*id))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    pub async fn set_webhook_url(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
        webhook_url: &str,
    ) -> Result<Option<connection::Model>> {
        let Some(existing) = self.find_by_id(tenant_id, id).await? else {
            return Ok(None);
        };

        let mut model: connection::ActiveModel = existing.into();
        model.webhook_url = Set(Some(webhook_url.to_string()));
        model.updated_at = Set(Utc::now().fixed_offset());
        Ok(Some(model.update(&*self.db).await?))
    }

    pub async fn update_secret(
        &self,
        tenant_id: &Uuid,
        id: &Uuid,
        secret_ciphertext: Vec<u8>,
    ) -> Result<Option<connection::Model>> {
        let Some(existing) = self.find_by_id(tenant_id, id).await? else {
            return Ok(None);
        };

        let mut model: connection::ActiveModel = existing.into();
        model.secret_ciphertext = Set(Some(secret_ciphertext));
        model.updated_at = Set(Utc::now().fixed_offset());
        Ok(Some(model.update(&*self.db).await?))
    }

    /// Deletes a connection within a tenant scope; returns whether it existed
    pub async fn delete_by_id(&self, tenant_id: &Uuid, id: &Uuid) -> Result<bool> {
        let result = Connection::delete_by_id(*id)
            .filter(connection::Column::TenantId.eq(*tenant_id))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }
}
