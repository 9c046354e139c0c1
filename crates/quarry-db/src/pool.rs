//! Database connection pool management
//!
//! Provides PostgreSQL connection pooling using SQLx and implements the
//! connection gateway on top of it.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::TryStreamExt;
use quarry_core::{DatabaseConfig, Record, Value};
use regex::Regex;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo};
use tracing::{debug, instrument, warn};

use crate::error::DataResult;
use crate::gateway::{ConnectionGateway, DedicatedConnection, Executor, PoolStats, QueryOutput};

/// Database connection pool
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(config: &DatabaseConfig) -> DataResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect(&config.url)
            .await?;

        tracing::info!(
            "Database pool created with {} max connections",
            config.max_connections
        );

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database is reachable
    pub async fn ping(&self) -> DataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}

#[async_trait]
impl Executor for Database {
    #[instrument(skip(self, params), fields(params = params.len()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> DataResult<QueryOutput> {
        debug!(sql, "executing statement");
        run(&self.pool, sql, params).await
    }
}

#[async_trait]
impl ConnectionGateway for Database {
    async fn acquire(&self) -> DataResult<Box<dyn DedicatedConnection>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgDedicatedConnection { conn }))
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
        }
    }
}

/// A pooled connection checked out for a transaction or migration run
pub struct PgDedicatedConnection {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl DedicatedConnection for PgDedicatedConnection {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> DataResult<QueryOutput> {
        debug!(sql, params = params.len(), "executing statement on dedicated connection");
        run(&mut *self.conn, sql, params).await
    }

    async fn execute_batch(&mut self, sql: &str) -> DataResult<()> {
        // Unprepared: the simple query protocol accepts several statements
        sqlx::Executor::execute(&mut *self.conn, sql).await?;
        Ok(())
    }

    fn release(self: Box<Self>) {
        drop(self.conn);
    }
}

async fn run<'c, E>(executor: E, sql: &str, params: &[Value]) -> DataResult<QueryOutput>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let query = params
        .iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value));

    if returns_rows(sql) {
        let rows: Vec<Record> = query
            .fetch(executor)
            .map_ok(|row| decode_row(&row))
            .try_collect()
            .await?;
        Ok(QueryOutput {
            row_count: rows.len() as u64,
            rows,
        })
    } else {
        let done = query.execute(executor).await?;
        Ok(QueryOutput {
            rows: Vec::new(),
            row_count: done.rows_affected(),
        })
    }
}

static ROW_RETURNING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*(SELECT|WITH|VALUES|TABLE|SHOW|EXPLAIN)\b|\bRETURNING\b")
        .unwrap()
});

/// Whether a statement produces a result set
fn returns_rows(sql: &str) -> bool {
    ROW_RETURNING.is_match(sql)
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        // Rendered statements inline NULL; this covers raw parameter lists
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Timestamp(t) => query.bind(*t),
        Value::Text(s) => query.bind(s.clone()),
        Value::Uuid(u) => query.bind(*u),
        Value::Date(d) => query.bind(*d),
        Value::Json(j) => query.bind(j.clone()),
        Value::Record(_) | Value::Records(_) => {
            query.bind(serde_json::to_value(value).unwrap_or_default())
        }
    }
}

fn decode_row(row: &PgRow) -> Record {
    row.columns()
        .iter()
        .map(|col| {
            let value = decode_column(row, col.ordinal(), col.type_info().name());
            (col.name().to_string(), value)
        })
        .collect()
}

fn decode_column(row: &PgRow, index: usize, type_name: &str) -> Value {
    let decoded: Result<Value, sqlx::Error> = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index).map(Value::from),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .map(|v| v.map(i64::from).into()),
        "INT4" => row.try_get::<Option<i32>, _>(index).map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(index).map(Value::from),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .map(|v| v.map(f64::from).into()),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index).map(Value::from),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .map(Value::from),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .map(|v| v.map(|t| t.and_utc()).into()),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)
            .map(Value::from),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)
            .map(Value::from),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(index)
            .map(Value::from),
        _ => row.try_get::<Option<String>, _>(index).map(Value::from),
    };

    decoded.unwrap_or_else(|e| {
        warn!(column = index, column_type = type_name, error = %e, "unsupported column type, reading as NULL");
        Value::Null
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_rows() {
        assert!(returns_rows(r#"SELECT * FROM "users""#));
        assert!(returns_rows("  with x AS (SELECT 1) SELECT * FROM x"));
        assert!(returns_rows(r#"INSERT INTO "users" ("name") VALUES ($1) RETURNING *"#));
        assert!(returns_rows(r#"DELETE FROM "users" WHERE "id" = $1 RETURNING *"#));

        assert!(!returns_rows(r#"UPDATE "users" SET "name" = $1 WHERE "id" = $2"#));
        assert!(!returns_rows("CREATE TABLE IF NOT EXISTS migrations (id SERIAL)"));
        assert!(!returns_rows(r#"INSERT INTO "users" ("returning_at") VALUES ($1)"#));
        assert!(!returns_rows("BEGIN ISOLATION LEVEL SERIALIZABLE"));
    }
}
