//! # quarry-db
//!
//! Data access for Quarry on top of PostgreSQL.
//!
//! - Connection gateway trait, with a SQLx pool and an in-memory implementation
//! - Executable query builder with batched relationship loading
//! - Per-table repositories with guarded UPDATE/DELETE
//! - Transactions with commit/rollback/release guarantees
//! - Migration tracking
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use quarry_core::{record, DatabaseConfig};
//! use quarry_db::{Database, Repository, RepositoryConfig, TransactionCoordinator};
//!
//! let db = Arc::new(Database::connect(&DatabaseConfig::default()).await?);
//! let users = Repository::new(RepositoryConfig::new("users"), db.clone());
//!
//! let admins = users.where_eq("role", "admin").include(["team"]).exec().await?;
//!
//! TransactionCoordinator::new(db.clone())
//!     .transaction(|tx| {
//!         let users = users.with_executor(tx);
//!         async move {
//!             users.insert(record! { "displayName" => "Ada" }).await?;
//!             Ok::<_, quarry_db::DataError>(())
//!         }
//!     })
//!     .await?;
//! ```

pub mod error;
pub mod gateway;
pub mod memory;
pub mod migrations;
pub mod pool;
pub mod query;
pub mod relations;
pub mod repository;
pub mod transaction;

pub use error::{DataError, DataResult};
pub use gateway::{ConnectionGateway, DedicatedConnection, Executor, PoolStats, QueryOutput};
pub use memory::{MemoryGateway, Statement};
pub use migrations::{create_migration, MigrationFile, MigrationRecord, MigrationStatus, MigrationTracker};
pub use pool::Database;
pub use query::QueryBuilder;
pub use relations::{Relation, RelationKind, RelationRegistry, RelationResolver};
pub use repository::{DeleteBuilder, Repository, RepositoryConfig, UpdateBuilder};
pub use transaction::{IsolationLevel, Transaction, TransactionCoordinator};
