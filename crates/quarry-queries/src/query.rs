//! Query Descriptor
//!
//! The immutable description of a SELECT. Every method that changes the
//! query returns a new descriptor and leaves the receiver untouched, so a
//! descriptor can be branched into independent chains.

use quarry_core::Value;

use crate::columns::Projection;
use crate::filters::{Filter, FilterOperator, Operand};
use crate::sorts::{SortCriterion, SortDirection};
use crate::sql::{self, SqlStatement};

#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    table: String,
    projection: Projection,
    filters: Vec<Filter>,
    sorts: Vec<SortCriterion>,
    limit: Option<u64>,
    offset: Option<u64>,
    includes: Vec<String>,
}

impl QueryDescriptor {
    /// Select everything from `table`
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            projection: Projection::All,
            filters: Vec::new(),
            sorts: Vec::new(),
            limit: None,
            offset: None,
            includes: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn sorts(&self) -> &[SortCriterion] {
        &self.sorts
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    /// Relationship names to resolve after execution, in request order
    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    /// Replace the projection
    pub fn select<S: Into<String>>(&self, fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            projection: Projection::fields(fields),
            ..self.clone()
        }
    }

    /// Append a predicate
    pub fn filter(&self, filter: Filter) -> Self {
        let mut next = self.clone();
        next.filters.push(filter);
        next
    }

    /// Append `field <operator> operand`
    pub fn where_op(
        &self,
        field: impl Into<String>,
        operator: FilterOperator,
        operand: impl Into<Operand>,
    ) -> Self {
        self.filter(Filter::new(field, operator, operand.into()))
    }

    pub fn where_eq(&self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::equals(field, value))
    }

    pub fn where_in<V: Into<Value>>(
        &self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filter(Filter::in_list(field, values))
    }

    pub fn where_not_in<V: Into<Value>>(
        &self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filter(Filter::not_in_list(field, values))
    }

    pub fn where_null(&self, field: impl Into<String>) -> Self {
        self.filter(Filter::is_null(field))
    }

    pub fn where_not_null(&self, field: impl Into<String>) -> Self {
        self.filter(Filter::is_not_null(field))
    }

    /// Append a sort criterion
    pub fn order_by(&self, field: impl Into<String>, direction: SortDirection) -> Self {
        let mut next = self.clone();
        next.sorts.push(SortCriterion::new(field, direction));
        next
    }

    pub fn limit(&self, limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..self.clone()
        }
    }

    pub fn offset(&self, offset: u64) -> Self {
        Self {
            offset: Some(offset),
            ..self.clone()
        }
    }

    /// Mark relationships for resolution; repeated names are kept once
    pub fn include<S: Into<String>>(&self, relations: impl IntoIterator<Item = S>) -> Self {
        let mut next = self.clone();
        for name in relations {
            let name = name.into();
            if !next.includes.contains(&name) {
                next.includes.push(name);
            }
        }
        next
    }

    /// Render to SQL and positional parameters
    pub fn to_sql(&self) -> SqlStatement {
        sql::render_select(self)
    }

    /// Render the `COUNT(*)` variant sharing this query's WHERE clause
    pub fn to_count_sql(&self) -> SqlStatement {
        sql::render_count(&self.table, &self.filters)
    }
}
