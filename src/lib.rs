//! # Stagehand
//!
//! Dynamic table definitions, SQL generation and staged bulk writes for PostgreSQL.
//!
//! Clients describe tables, indexes and aggregate queries as plain data. Stagehand turns
//! those descriptions into dialect-correct SQL, routes bulk writes into a loosely-typed
//! staging table (`__tmp_write_<table>`) when one exists, and promotes staged rows into
//! the strongly-typed actual table in bounded, type-casting flushes.
//!
//! ```no_run
//! use stagehand::{connect, MayPostgresExecutor, StagehandConfig, TableService};
//! use stagehand::definition::{ColumnDefinition, TableDefinition};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StagehandConfig::load()?;
//! let executor = MayPostgresExecutor::new(connect(&config.database.url)?);
//! let service = TableService::new(executor, &config)?;
//!
//! let users = TableDefinition::new(
//!     "public",
//!     "users",
//!     vec![
//!         ColumnDefinition::new("id", "INT").primary_key(),
//!         ColumnDefinition::new("name", "TEXT").not_null(),
//!     ],
//! )
//! .staging(true);
//! service.create_table(&users)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod definition;
pub mod error;
pub mod executor;
pub mod metadata;
pub mod metrics;
pub mod query;
pub mod service;
pub mod sql;
pub mod value;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::{FlushConfig, FlushMode, StagehandConfig};
pub use connection::{connect, ConnectionError};
pub use error::StagehandError;
pub use executor::{ExecError, MayPostgresExecutor, SqlExecutor};
pub use metadata::{MetadataCache, MetadataRegistry, MetadataResolver, TablePresence};
pub use service::{InsertSummary, TableService, WriteTarget};
pub use sql::{SqlBuilder, SqlDialect};
pub use value::{GenericRow, RowValues, SqlValue};
