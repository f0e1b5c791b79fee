//! # Repository Layer
//!
//! SeaORM access for the persisted entities, with tenant-aware methods.

pub mod connection;
pub mod tenant;

pub use connection::{ConnectionRepository, NewConnection};
pub use tenant::TenantRepository;
