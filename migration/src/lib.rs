//! Database migrations for the channel pairing service.
//!
//! Tenants first, then the connections that hang off them.

pub use sea_orm_migration::prelude::*;

mod m2026_10_01_000001_create_tenants;
mod m2026_10_01_000100_create_channel_connections;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_10_01_000001_create_tenants::Migration),
            Box::new(m2026_10_01_000100_create_channel_connections::Migration),
        ]
    }
}
