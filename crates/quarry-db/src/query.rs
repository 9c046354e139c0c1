//! Executable query builder
//!
//! Pairs an immutable [`QueryDescriptor`] with the executor and relationship
//! registry it runs against. Chain methods return new builders; the receiver
//! stays valid and can be branched.

use std::sync::Arc;

use quarry_core::{record_to_external, PaginatedResult, Pagination, Record, Value};
use quarry_queries::{Filter, FilterOperator, Operand, QueryDescriptor, SortDirection, SqlStatement};
use tracing::debug;

use crate::error::{DataError, DataResult};
use crate::gateway::Executor;
use crate::relations::{RelationRegistry, RelationResolver};

#[derive(Clone)]
pub struct QueryBuilder {
    descriptor: QueryDescriptor,
    executor: Arc<dyn Executor>,
    relations: Arc<RelationRegistry>,
}

impl QueryBuilder {
    pub fn new(
        descriptor: QueryDescriptor,
        executor: Arc<dyn Executor>,
        relations: Arc<RelationRegistry>,
    ) -> Self {
        Self {
            descriptor,
            executor,
            relations,
        }
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    fn with(&self, descriptor: QueryDescriptor) -> Self {
        Self {
            descriptor,
            executor: Arc::clone(&self.executor),
            relations: Arc::clone(&self.relations),
        }
    }

    pub fn select<S: Into<String>>(&self, fields: impl IntoIterator<Item = S>) -> Self {
        self.with(self.descriptor.select(fields))
    }

    pub fn filter(&self, filter: Filter) -> Self {
        self.with(self.descriptor.filter(filter))
    }

    pub fn where_op(
        &self,
        field: impl Into<String>,
        operator: FilterOperator,
        operand: impl Into<Operand>,
    ) -> Self {
        self.with(self.descriptor.where_op(field, operator, operand))
    }

    pub fn where_eq(&self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(self.descriptor.where_eq(field, value))
    }

    pub fn where_in<V: Into<Value>>(
        &self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.with(self.descriptor.where_in(field, values))
    }

    pub fn where_not_in<V: Into<Value>>(
        &self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.with(self.descriptor.where_not_in(field, values))
    }

    pub fn where_null(&self, field: impl Into<String>) -> Self {
        self.with(self.descriptor.where_null(field))
    }

    pub fn where_not_null(&self, field: impl Into<String>) -> Self {
        self.with(self.descriptor.where_not_null(field))
    }

    pub fn order_by(&self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.with(self.descriptor.order_by(field, direction))
    }

    pub fn limit(&self, limit: u64) -> Self {
        self.with(self.descriptor.limit(limit))
    }

    pub fn offset(&self, offset: u64) -> Self {
        self.with(self.descriptor.offset(offset))
    }

    pub fn include<S: Into<String>>(&self, relations: impl IntoIterator<Item = S>) -> Self {
        self.with(self.descriptor.include(relations))
    }

    pub fn to_sql(&self) -> SqlStatement {
        self.descriptor.to_sql()
    }

    /// Run the query and resolve included relationships
    pub async fn exec(&self) -> DataResult<Vec<Record>> {
        let stmt = self.descriptor.to_sql();
        let output = self.executor.execute(&stmt.sql, &stmt.params).await?;
        let mut records: Vec<Record> = output.rows.into_iter().map(record_to_external).collect();

        let includes = self.descriptor.includes();
        if !records.is_empty() && !includes.is_empty() && !self.relations.is_empty() {
            debug!(
                table = self.descriptor.table(),
                relations = includes.len(),
                "resolving included relationships"
            );
            RelationResolver::new(Arc::clone(&self.executor))
                .resolve(&mut records, &self.relations, includes)
                .await?;
        }

        Ok(records)
    }

    /// First matching record
    pub async fn first(&self) -> DataResult<Option<Record>> {
        Ok(self.limit(1).exec().await?.into_iter().next())
    }

    /// `COUNT(*)` over this query's predicates
    pub async fn count(&self) -> DataResult<u64> {
        let stmt = self.descriptor.to_count_sql();
        let output = self.executor.execute(&stmt.sql, &stmt.params).await?;
        output
            .rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_i64)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| DataError::Decode("COUNT(*) did not return a count".into()))
    }

    /// Total count plus one page of records
    pub async fn paginate(&self, pagination: Pagination) -> DataResult<PaginatedResult<Record>> {
        let total = self.count().await?;
        let items = self
            .limit(pagination.limit)
            .offset(pagination.offset)
            .exec()
            .await?;
        Ok(PaginatedResult::new(items, total, pagination))
    }
}
