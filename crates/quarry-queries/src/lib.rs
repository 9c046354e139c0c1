//! # quarry-queries
//!
//! Query descriptions and SQL rendering for Quarry.
//!
//! This crate is pure: it never talks to a database. It holds the immutable
//! query descriptor and renders it, along with INSERT/UPDATE/DELETE requests,
//! to PostgreSQL text with positional parameters.
//!
//! ## Structure
//!
//! - `filters` - Predicates and comparison operators
//! - `sorts` - Sort criteria and directions
//! - `columns` - Projected column list
//! - `query` - The immutable query descriptor
//! - `sql` - Rendering to SQL + parameters
//!
//! ## Example
//!
//! ```
//! use quarry_queries::{QueryDescriptor, SortDirection};
//!
//! let base = QueryDescriptor::new("posts").where_eq("published", true);
//! let mine = base.where_eq("authorId", 7).order_by("createdAt", SortDirection::Desc);
//!
//! let stmt = mine.to_sql();
//! assert_eq!(
//!     stmt.sql,
//!     r#"SELECT * FROM "posts" WHERE "published" = $1 AND "author_id" = $2 ORDER BY "created_at" DESC"#
//! );
//! assert_eq!(base.filters().len(), 1);
//! ```

pub mod columns;
pub mod filters;
pub mod query;
pub mod sorts;
pub mod sql;

pub use columns::Projection;
pub use filters::{Filter, FilterOperator, Operand};
pub use query::QueryDescriptor;
pub use sorts::{SortCriterion, SortDirection};
pub use sql::{quote_identifier, SqlStatement};
