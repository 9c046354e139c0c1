//! Connection gateway
//!
//! The seam between the data-access core and a database driver. Short-lived
//! statements go through [`Executor`], which borrows a pooled connection per
//! call. Transactions and migrations take a [`DedicatedConnection`] for the
//! whole unit of work and must release it exactly once.

use async_trait::async_trait;
use quarry_core::{Record, Value};

use crate::error::DataResult;

/// Rows and affected-row count of one statement
///
/// Rows are keyed by column name in storage naming.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub rows: Vec<Record>,
    pub row_count: u64,
}

impl QueryOutput {
    pub fn rows(rows: Vec<Record>) -> Self {
        let row_count = rows.len() as u64;
        Self { rows, row_count }
    }

    pub fn affected(row_count: u64) -> Self {
        Self {
            rows: vec![],
            row_count,
        }
    }
}

/// Anything that can run a parameterized statement
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, sql: &str, params: &[Value]) -> DataResult<QueryOutput>;
}

/// A connection held outside the pool for a unit of work
#[async_trait]
pub trait DedicatedConnection: Send {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> DataResult<QueryOutput>;

    /// Run a parameterless, possibly multi-statement script
    async fn execute_batch(&mut self, sql: &str) -> DataResult<()>;

    /// Hand the connection back to its pool
    fn release(self: Box<Self>);
}

/// Pool-level access: shared execution plus dedicated connections
#[async_trait]
pub trait ConnectionGateway: Executor {
    async fn acquire(&self) -> DataResult<Box<dyn DedicatedConnection>>;

    fn stats(&self) -> PoolStats;
}

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
}

impl PoolStats {
    /// Connections currently checked out
    pub fn in_use(&self) -> usize {
        (self.size as usize).saturating_sub(self.idle)
    }
}
