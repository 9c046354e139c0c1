//! # quarry-core
//!
//! Core building blocks shared by the Quarry crates:
//!
//! - `value` - tagged column values and ordered row records
//! - `naming` - camelCase/snake_case conversion at the SQL boundary
//! - `config` - application configuration loading
//! - `pagination` - limit/offset parameters and paged results

pub mod config;
pub mod naming;
pub mod pagination;
pub mod value;

pub use config::{AppConfig, ConfigError, DatabaseConfig, MigrationConfig};
pub use naming::{record_to_external, to_external_name, to_storage_name};
pub use pagination::{PaginatedResult, Pagination};
pub use value::{Record, Value};
