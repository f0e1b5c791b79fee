//! # Channels API Library
//!
//! Pairing of messaging accounts through a provider, and management of the
//! resulting channel connections: status refresh, webhook configuration,
//! secret rotation and deletion.

pub mod auth;
pub mod config;
pub mod connections;
pub mod crypto;
pub mod cursor;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod pairing;
pub mod provider;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub use migration;
