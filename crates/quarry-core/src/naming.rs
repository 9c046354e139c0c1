//! Field naming conversion
//!
//! Callers use camelCase field names; the database uses snake_case columns.
//! Names are converted at the SQL boundary and never stored converted.

use heck::{ToLowerCamelCase, ToSnakeCase};

use crate::value::Record;

/// `createdAt` -> `created_at`
pub fn to_storage_name(field: &str) -> String {
    field.to_snake_case()
}

/// `created_at` -> `createdAt`
pub fn to_external_name(column: &str) -> String {
    column.to_lower_camel_case()
}

/// Rename every top-level key of a row from storage to external naming
pub fn record_to_external(row: Record) -> Record {
    row.into_iter()
        .map(|(column, value)| (to_external_name(&column), value))
        .collect()
}
