//! Per-table repository
//!
//! Reads go through [`QueryBuilder`]. Writes render INSERT/UPDATE/DELETE
//! directly and enforce the WHERE guards before anything is sent.

use std::collections::HashSet;
use std::sync::Arc;

use quarry_core::{record_to_external, PaginatedResult, Pagination, Record, Value};
use quarry_queries::sql::{render_delete, render_insert, render_update};
use quarry_queries::{Filter, FilterOperator, Operand, QueryDescriptor, SortDirection};
use tracing::debug;

use crate::error::{DataError, DataResult};
use crate::gateway::Executor;
use crate::query::QueryBuilder;
use crate::relations::RelationRegistry;

/// Table identity and write rules
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub table: String,
    pub primary_key: String,
    /// Fields never written by insert or update
    pub excluded: HashSet<String>,
    /// Field set to `NOW()` on every update
    pub updated_at: Option<String>,
}

impl RepositoryConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: "id".to_string(),
            excluded: ["id", "createdAt", "updatedAt"]
                .into_iter()
                .map(String::from)
                .collect(),
            updated_at: Some("updatedAt".to_string()),
        }
    }

    pub fn with_primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = field.into();
        self
    }

    pub fn with_excluded<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.excluded = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_updated_at(mut self, field: Option<&str>) -> Self {
        self.updated_at = field.map(String::from);
        self
    }

    fn is_writable(&self, field: &str) -> bool {
        !self.excluded.contains(field) && self.updated_at.as_deref() != Some(field)
    }
}

/// CRUD facade over one table
#[derive(Clone)]
pub struct Repository {
    config: Arc<RepositoryConfig>,
    relations: Arc<RelationRegistry>,
    executor: Arc<dyn Executor>,
}

impl Repository {
    pub fn new(config: RepositoryConfig, executor: Arc<dyn Executor>) -> Self {
        Self {
            config: Arc::new(config),
            relations: Arc::new(RelationRegistry::empty()),
            executor,
        }
    }

    pub fn with_relations(mut self, relations: RelationRegistry) -> Self {
        self.relations = Arc::new(relations);
        self
    }

    /// Same table and relationships on another executor, e.g. a transaction
    pub fn with_executor(&self, executor: Arc<dyn Executor>) -> Self {
        Self {
            config: Arc::clone(&self.config),
            relations: Arc::clone(&self.relations),
            executor,
        }
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn relations(&self) -> &RelationRegistry {
        &self.relations
    }

    /// Query over the whole table
    pub fn query(&self) -> QueryBuilder {
        QueryBuilder::new(
            QueryDescriptor::new(self.config.table.as_str()),
            Arc::clone(&self.executor),
            Arc::clone(&self.relations),
        )
    }

    pub fn select<S: Into<String>>(&self, fields: impl IntoIterator<Item = S>) -> QueryBuilder {
        self.query().select(fields)
    }

    pub fn filter(&self, filter: Filter) -> QueryBuilder {
        self.query().filter(filter)
    }

    pub fn where_op(
        &self,
        field: impl Into<String>,
        operator: FilterOperator,
        operand: impl Into<Operand>,
    ) -> QueryBuilder {
        self.query().where_op(field, operator, operand)
    }

    pub fn where_eq(&self, field: impl Into<String>, value: impl Into<Value>) -> QueryBuilder {
        self.query().where_eq(field, value)
    }

    pub fn where_in<V: Into<Value>>(
        &self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> QueryBuilder {
        self.query().where_in(field, values)
    }

    pub fn where_null(&self, field: impl Into<String>) -> QueryBuilder {
        self.query().where_null(field)
    }

    pub fn where_not_null(&self, field: impl Into<String>) -> QueryBuilder {
        self.query().where_not_null(field)
    }

    pub fn order_by(&self, field: impl Into<String>, direction: SortDirection) -> QueryBuilder {
        self.query().order_by(field, direction)
    }

    pub fn include<S: Into<String>>(&self, relations: impl IntoIterator<Item = S>) -> QueryBuilder {
        self.query().include(relations)
    }

    pub async fn find_all(&self) -> DataResult<Vec<Record>> {
        self.query().exec().await
    }

    pub async fn find_by_id(&self, id: impl Into<Value>) -> DataResult<Option<Record>> {
        self.by_id(id).first().await
    }

    pub async fn exists_by_id(&self, id: impl Into<Value>) -> DataResult<bool> {
        Ok(self.by_id(id).count().await? > 0)
    }

    pub async fn count(&self) -> DataResult<u64> {
        self.query().count().await
    }

    pub async fn paginate(&self, pagination: Pagination) -> DataResult<PaginatedResult<Record>> {
        self.query().paginate(pagination).await
    }

    /// Insert one row, dropping excluded fields
    pub async fn insert(&self, data: Record) -> DataResult<Record> {
        let row: Record = data
            .into_iter()
            .filter(|(field, _)| self.config.is_writable(field))
            .collect();
        let fields: Vec<String> = row.fields().map(String::from).collect();

        let stmt = render_insert(&self.config.table, &fields, std::slice::from_ref(&row));
        let output = self.executor.execute(&stmt.sql, &stmt.params).await?;
        output
            .rows
            .into_iter()
            .next()
            .map(record_to_external)
            .ok_or_else(|| DataError::Decode(format!("INSERT into {} returned no row", self.config.table)))
    }

    /// Insert several rows in one statement
    ///
    /// Columns come from the first row; callers pass rows with the same
    /// fields. An empty batch sends nothing. Rows with no writable fields
    /// are inserted one `DEFAULT VALUES` statement at a time.
    pub async fn insert_many(&self, rows: Vec<Record>) -> DataResult<Vec<Record>> {
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let fields: Vec<String> = first
            .fields()
            .filter(|field| self.config.is_writable(field))
            .map(String::from)
            .collect();

        debug!(table = %self.config.table, rows = rows.len(), "inserting batch");
        if fields.is_empty() {
            let mut inserted = Vec::with_capacity(rows.len());
            for row in &rows {
                let stmt = render_insert(&self.config.table, &[], std::slice::from_ref(row));
                let output = self.executor.execute(&stmt.sql, &stmt.params).await?;
                inserted.extend(output.rows.into_iter().map(record_to_external));
            }
            return Ok(inserted);
        }

        let stmt = render_insert(&self.config.table, &fields, &rows);
        let output = self.executor.execute(&stmt.sql, &stmt.params).await?;
        Ok(output.rows.into_iter().map(record_to_external).collect())
    }

    /// Start an update; it needs at least one condition before `exec`
    pub fn update(&self, data: Record) -> UpdateBuilder {
        UpdateBuilder {
            repository: self.clone(),
            data,
            filters: Vec::new(),
        }
    }

    /// Start a delete; it needs at least one condition before `exec`
    pub fn delete(&self) -> DeleteBuilder {
        DeleteBuilder {
            repository: self.clone(),
            filters: Vec::new(),
        }
    }

    pub async fn update_by_id(&self, id: impl Into<Value>, data: Record) -> DataResult<Option<Record>> {
        let rows = self
            .update(data)
            .where_eq(self.config.primary_key.as_str(), id)
            .exec()
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn delete_by_id(&self, id: impl Into<Value>) -> DataResult<bool> {
        let deleted = self
            .delete()
            .where_eq(self.config.primary_key.as_str(), id)
            .exec()
            .await?;
        Ok(deleted > 0)
    }

    fn by_id(&self, id: impl Into<Value>) -> QueryBuilder {
        self.where_eq(self.config.primary_key.as_str(), id)
    }
}

/// Pending UPDATE
pub struct UpdateBuilder {
    repository: Repository,
    data: Record,
    filters: Vec<Filter>,
}

impl UpdateBuilder {
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn where_op(
        self,
        field: impl Into<String>,
        operator: FilterOperator,
        operand: impl Into<Operand>,
    ) -> Self {
        self.filter(Filter::new(field, operator, operand.into()))
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::equals(field, value))
    }

    pub fn where_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filter(Filter::in_list(field, values))
    }

    pub fn where_null(self, field: impl Into<String>) -> Self {
        self.filter(Filter::is_null(field))
    }

    /// Run the update and return every updated row
    pub async fn exec(self) -> DataResult<Vec<Record>> {
        if self.filters.is_empty() {
            return Err(DataError::UpdateWithoutWhere);
        }

        let config = &self.repository.config;
        let assignments: Vec<(String, Value)> = self
            .data
            .into_iter()
            .filter(|(field, _)| config.is_writable(field))
            .collect();
        if assignments.is_empty() {
            return Err(DataError::NoUpdateFields);
        }

        let stmt = render_update(
            &config.table,
            &assignments,
            config.updated_at.as_deref(),
            &self.filters,
        );
        let output = self
            .repository
            .executor
            .execute(&stmt.sql, &stmt.params)
            .await?;
        Ok(output.rows.into_iter().map(record_to_external).collect())
    }
}

/// Pending DELETE
pub struct DeleteBuilder {
    repository: Repository,
    filters: Vec<Filter>,
}

impl DeleteBuilder {
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn where_op(
        self,
        field: impl Into<String>,
        operator: FilterOperator,
        operand: impl Into<Operand>,
    ) -> Self {
        self.filter(Filter::new(field, operator, operand.into()))
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::equals(field, value))
    }

    pub fn where_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filter(Filter::in_list(field, values))
    }

    pub fn where_null(self, field: impl Into<String>) -> Self {
        self.filter(Filter::is_null(field))
    }

    /// Run the delete and return the number of rows removed
    pub async fn exec(self) -> DataResult<u64> {
        if self.filters.is_empty() {
            return Err(DataError::DeleteWithoutWhere);
        }

        let config = &self.repository.config;
        let stmt = render_delete(&config.table, &self.filters);
        let output = self
            .repository
            .executor
            .execute(&stmt.sql, &stmt.params)
            .await?;
        debug!(table = %config.table, deleted = output.row_count, "delete finished");
        Ok(output.row_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::QueryOutput;
    use crate::memory::MemoryGateway;
    use quarry_core::record;

    fn users(gateway: &MemoryGateway) -> Repository {
        Repository::new(RepositoryConfig::new("users"), Arc::new(gateway.clone()))
    }

    fn echo_returning(sql: &str, params: &[Value]) -> DataResult<QueryOutput> {
        if sql.starts_with("INSERT") || sql.starts_with("UPDATE") {
            let rows = params
                .iter()
                .enumerate()
                .map(|(i, v)| record! { "id" => i as i64 + 1, "display_name" => v.clone() })
                .collect();
            Ok(QueryOutput::rows(rows))
        } else if sql.starts_with("DELETE") {
            Ok(QueryOutput::affected(3))
        } else {
            Ok(QueryOutput::default())
        }
    }

    #[tokio::test]
    async fn test_insert_drops_excluded_fields() {
        let gateway = MemoryGateway::with_responder(echo_returning);
        let created = users(&gateway)
            .insert(record! {
                "id" => 99,
                "displayName" => "Ada",
                "createdAt" => "yesterday",
                "updatedAt" => "today",
            })
            .await
            .unwrap();

        let statements = gateway.statements();
        assert_eq!(
            statements[0].sql,
            r#"INSERT INTO "users" ("display_name") VALUES ($1) RETURNING *"#
        );
        assert_eq!(statements[0].params, vec![Value::from("Ada")]);
        assert_eq!(created.get("displayName"), Some(&Value::from("Ada")));
    }

    #[tokio::test]
    async fn test_insert_with_only_excluded_fields_uses_defaults() {
        let gateway = MemoryGateway::with_responder(|_, _| {
            Ok(QueryOutput::rows(vec![record! { "id" => 1 }]))
        });
        users(&gateway).insert(record! { "id" => 5 }).await.unwrap();
        assert_eq!(
            gateway.sql_log()[0],
            r#"INSERT INTO "users" DEFAULT VALUES RETURNING *"#
        );
    }

    #[tokio::test]
    async fn test_insert_many_empty_sends_nothing() {
        let gateway = MemoryGateway::new();
        let rows = users(&gateway).insert_many(vec![]).await.unwrap();
        assert!(rows.is_empty());
        assert!(gateway.statements().is_empty());
    }

    #[tokio::test]
    async fn test_insert_many_uses_first_row_columns() {
        let gateway = MemoryGateway::with_responder(echo_returning);
        let rows = users(&gateway)
            .insert_many(vec![
                record! { "id" => 1, "displayName" => "Ada", "email" => "a@x.io" },
                record! { "displayName" => "Grace", "email" => "g@x.io" },
            ])
            .await
            .unwrap();

        let statements = gateway.statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].sql,
            r#"INSERT INTO "users" ("display_name", "email") VALUES ($1, $2), ($3, $4) RETURNING *"#
        );
        assert_eq!(statements[0].params[2], Value::from("Grace"));
        assert_eq!(rows.len(), 4);
    }

    #[tokio::test]
    async fn test_insert_many_defaults_every_row() {
        let gateway = MemoryGateway::with_responder(|_, _| {
            Ok(QueryOutput::rows(vec![record! { "id" => 1, "created_at" => "now" }]))
        });
        let rows = users(&gateway)
            .insert_many(vec![
                record! { "id" => 1 },
                record! { "id" => 2 },
                record! { "id" => 3 },
            ])
            .await
            .unwrap();

        let log = gateway.sql_log();
        assert_eq!(log.len(), 3);
        assert!(log
            .iter()
            .all(|sql| sql == r#"INSERT INTO "users" DEFAULT VALUES RETURNING *"#));
        assert_eq!(rows.len(), 3);
        assert!(rows[2].contains("createdAt"));
    }

    #[tokio::test]
    async fn test_update_to_null_is_inlined() {
        let gateway = MemoryGateway::with_responder(echo_returning);
        users(&gateway)
            .update_by_id(7, record! { "managerId" => Value::Null })
            .await
            .unwrap();

        let statements = gateway.statements();
        assert_eq!(
            statements[0].sql,
            r#"UPDATE "users" SET "manager_id" = NULL, "updated_at" = NOW() WHERE "id" = $1 RETURNING *"#
        );
        assert_eq!(statements[0].params, vec![Value::Int(7)]);
    }

    #[tokio::test]
    async fn test_update_requires_where() {
        let gateway = MemoryGateway::new();
        let err = users(&gateway)
            .update(record! { "displayName" => "Ada" })
            .exec()
            .await
            .unwrap_err();

        assert!(matches!(err, DataError::UpdateWithoutWhere));
        assert!(gateway.statements().is_empty());
    }

    #[tokio::test]
    async fn test_update_requires_writable_fields() {
        let gateway = MemoryGateway::new();
        let err = users(&gateway)
            .update(record! { "id" => 3, "updatedAt" => "now" })
            .where_eq("id", 3)
            .exec()
            .await
            .unwrap_err();

        assert!(matches!(err, DataError::NoUpdateFields));
        assert!(gateway.statements().is_empty());
    }

    #[tokio::test]
    async fn test_update_touches_updated_at() {
        let gateway = MemoryGateway::with_responder(echo_returning);
        let rows = users(&gateway)
            .update(record! { "displayName" => "Ada", "updatedAt" => "ignored" })
            .where_eq("teamId", 4)
            .where_null("deletedAt")
            .exec()
            .await
            .unwrap();

        assert_eq!(
            gateway.sql_log()[0],
            r#"UPDATE "users" SET "display_name" = $1, "updated_at" = NOW() WHERE "team_id" = $2 AND "deleted_at" IS NULL RETURNING *"#
        );
        assert_eq!(rows[0].get("displayName"), Some(&Value::from("Ada")));
    }

    #[tokio::test]
    async fn test_update_without_touch_field() {
        let gateway = MemoryGateway::new();
        let repo = Repository::new(
            RepositoryConfig::new("tags").with_updated_at(None),
            Arc::new(gateway.clone()),
        );
        repo.update(record! { "label" => "rust" })
            .where_eq("id", 1)
            .exec()
            .await
            .unwrap();
        assert_eq!(
            gateway.sql_log()[0],
            r#"UPDATE "tags" SET "label" = $1 WHERE "id" = $2 RETURNING *"#
        );
    }

    #[tokio::test]
    async fn test_delete_requires_where() {
        let gateway = MemoryGateway::new();
        let err = users(&gateway).delete().exec().await.unwrap_err();
        assert!(matches!(err, DataError::DeleteWithoutWhere));
        assert!(err.is_safety_violation());
        assert!(gateway.statements().is_empty());
    }

    #[tokio::test]
    async fn test_delete_returns_count() {
        let gateway = MemoryGateway::with_responder(echo_returning);
        let deleted = users(&gateway)
            .delete()
            .where_in("id", [1, 2, 3])
            .exec()
            .await
            .unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(
            gateway.sql_log()[0],
            r#"DELETE FROM "users" WHERE "id" IN ($1, $2, $3)"#
        );
    }

    #[tokio::test]
    async fn test_by_id_helpers_return_empty_on_miss() {
        let gateway = MemoryGateway::new();
        let repo = users(&gateway);

        assert!(repo.find_by_id(7).await.unwrap().is_none());
        assert!(repo
            .update_by_id(7, record! { "displayName" => "x" })
            .await
            .unwrap()
            .is_none());
        assert!(!repo.delete_by_id(7).await.unwrap());

        let log = gateway.sql_log();
        assert_eq!(log[0], r#"SELECT * FROM "users" WHERE "id" = $1 LIMIT 1"#);
        assert_eq!(log[2], r#"DELETE FROM "users" WHERE "id" = $1"#);
    }

    #[tokio::test]
    async fn test_custom_primary_key() {
        let gateway = MemoryGateway::with_responder(|_, _| {
            Ok(QueryOutput::rows(vec![record! { "count" => 1 }]))
        });
        let repo = Repository::new(
            RepositoryConfig::new("accounts").with_primary_key("accountUuid"),
            Arc::new(gateway.clone()),
        );

        assert!(repo.exists_by_id("abc").await.unwrap());
        assert_eq!(
            gateway.sql_log()[0],
            r#"SELECT COUNT(*) AS count FROM "accounts" WHERE "account_uuid" = $1"#
        );
    }

    #[tokio::test]
    async fn test_with_executor_rebinds() {
        let first = MemoryGateway::new();
        let second = MemoryGateway::new();
        let repo = users(&first);
        let rebound = repo.with_executor(Arc::new(second.clone()));

        rebound.find_all().await.unwrap();
        assert!(first.statements().is_empty());
        assert_eq!(second.sql_log(), vec![r#"SELECT * FROM "users""#.to_string()]);
        assert_eq!(rebound.config().table, "users");
    }
}
