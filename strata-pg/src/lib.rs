//! Strata PG - PostgreSQL Backend
//!
//! This crate provides the PostgreSQL implementation of the Strata storage
//! contract:
//! - [`PgConfig`] / [`PgClient`]: deadpool-backed connection pool with
//!   placeholder translation, quoting, and nested transaction scopes
//!   (savepoints) including deadlock retry with linear backoff
//! - [`PostgresAdapter`]: dialect DDL and row-level CRUD implementing
//!   `strata_storage::Adapter`

mod adapter;
mod client;
mod config;
mod row;

pub use adapter::PostgresAdapter;
pub use client::{PgClient, DEFAULT_TX_RETRIES};
pub use config::PgConfig;
pub use row::PgParam;
