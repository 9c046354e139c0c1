//! SQL rendering
//!
//! Turns descriptors and write requests into PostgreSQL text with `$n`
//! placeholders. Identifiers are double-quoted and converted to storage
//! naming here, and nowhere else.

use quarry_core::{to_storage_name, Record, Value};

use crate::columns::Projection;
use crate::filters::{Filter, FilterOperator, Operand};
use crate::query::QueryDescriptor;

/// Rendered statement
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Allocates `$n` placeholders in first-appearance order
#[derive(Debug, Default)]
struct Placeholders {
    params: Vec<Value>,
}

impl Placeholders {
    /// NULL is written inline so Postgres infers the column type
    fn push(&mut self, value: Value) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.params.push(value);
        format!("${}", self.params.len())
    }
}

/// Double-quote an identifier, escaping embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quoted storage-named column for an external field name
fn column(field: &str) -> String {
    quote_identifier(&to_storage_name(field))
}

fn render_filter(filter: &Filter, binds: &mut Placeholders) -> String {
    let col = column(&filter.field);
    let op = filter.operator;

    match op {
        FilterOperator::IsNull | FilterOperator::IsNotNull => format!("{} {}", col, op),
        FilterOperator::In | FilterOperator::NotIn => {
            let values = filter.bound_values();
            if values.is_empty() {
                // Membership in an empty set
                return if op == FilterOperator::In {
                    "1 = 0".to_string()
                } else {
                    "1 = 1".to_string()
                };
            }
            let slots: Vec<String> = values.into_iter().map(|v| binds.push(v)).collect();
            format!("{} {} ({})", col, op, slots.join(", "))
        }
        _ => {
            let value = match &filter.operand {
                Operand::Value(v) => v.clone(),
                Operand::List(vs) => vs.first().cloned().unwrap_or_default(),
                Operand::None => Value::Null,
            };
            format!("{} {} {}", col, op, binds.push(value))
        }
    }
}

fn render_where(filters: &[Filter], binds: &mut Placeholders) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let conditions: Vec<String> = filters.iter().map(|f| render_filter(f, binds)).collect();
    format!(" WHERE {}", conditions.join(" AND "))
}

/// Render a SELECT
pub fn render_select(query: &QueryDescriptor) -> SqlStatement {
    let mut binds = Placeholders::default();

    let columns = match query.projection() {
        Projection::All => "*".to_string(),
        Projection::Fields(fields) => fields
            .iter()
            .map(|f| column(f))
            .collect::<Vec<_>>()
            .join(", "),
    };

    let mut sql = format!(
        "SELECT {} FROM {}",
        columns,
        quote_identifier(query.table())
    );
    sql.push_str(&render_where(query.filters(), &mut binds));

    if !query.sorts().is_empty() {
        let order: Vec<String> = query
            .sorts()
            .iter()
            .map(|s| format!("{} {}", column(&s.field), s.direction))
            .collect();
        sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
    }

    // LIMIT/OFFSET are caller-controlled integers and rendered inline
    if let Some(limit) = query.limit_value() {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = query.offset_value() {
        sql.push_str(&format!(" OFFSET {}", offset));
    }

    SqlStatement {
        sql,
        params: binds.params,
    }
}

/// Render `SELECT COUNT(*)` with the given predicates
pub fn render_count(table: &str, filters: &[Filter]) -> SqlStatement {
    let mut binds = Placeholders::default();
    let sql = format!(
        "SELECT COUNT(*) AS count FROM {}{}",
        quote_identifier(table),
        render_where(filters, &mut binds)
    );
    SqlStatement {
        sql,
        params: binds.params,
    }
}

/// Render a (multi-row) INSERT ... RETURNING *
///
/// `fields` defines the column list; a row missing a field gets NULL.
/// With no fields the statement inserts a single row of defaults, so
/// callers issue one statement per row.
pub fn render_insert(table: &str, fields: &[String], rows: &[Record]) -> SqlStatement {
    if fields.is_empty() {
        return SqlStatement {
            sql: format!(
                "INSERT INTO {} DEFAULT VALUES RETURNING *",
                quote_identifier(table)
            ),
            params: vec![],
        };
    }

    let mut binds = Placeholders::default();
    let columns: Vec<String> = fields.iter().map(|f| column(f)).collect();
    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let slots: Vec<String> = fields
                .iter()
                .map(|f| binds.push(row.get(f).cloned().unwrap_or_default()))
                .collect();
            format!("({})", slots.join(", "))
        })
        .collect();

    SqlStatement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES {} RETURNING *",
            quote_identifier(table),
            columns.join(", "),
            tuples.join(", ")
        ),
        params: binds.params,
    }
}

/// Render `UPDATE ... SET ... WHERE ... RETURNING *`
///
/// SET placeholders come first. `touch` names a field that is set to
/// `NOW()` server-side.
pub fn render_update(
    table: &str,
    assignments: &[(String, Value)],
    touch: Option<&str>,
    filters: &[Filter],
) -> SqlStatement {
    let mut binds = Placeholders::default();
    let mut sets: Vec<String> = assignments
        .iter()
        .map(|(field, value)| format!("{} = {}", column(field), binds.push(value.clone())))
        .collect();
    if let Some(field) = touch {
        sets.push(format!("{} = NOW()", column(field)));
    }

    let mut sql = format!(
        "UPDATE {} SET {}",
        quote_identifier(table),
        sets.join(", ")
    );
    sql.push_str(&render_where(filters, &mut binds));
    sql.push_str(" RETURNING *");

    SqlStatement {
        sql,
        params: binds.params,
    }
}

/// Render `DELETE FROM ... WHERE ...`
pub fn render_delete(table: &str, filters: &[Filter]) -> SqlStatement {
    let mut binds = Placeholders::default();
    let sql = format!(
        "DELETE FROM {}{}",
        quote_identifier(table),
        render_where(filters, &mut binds)
    );
    SqlStatement {
        sql,
        params: binds.params,
    }
}
