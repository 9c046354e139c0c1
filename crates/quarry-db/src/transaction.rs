//! Transactions
//!
//! A [`Transaction`] owns one dedicated connection from BEGIN until it is
//! released. It is Active until the first successful COMMIT or the first
//! ROLLBACK, and Completed afterwards.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use quarry_core::Value;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::{DataError, DataResult};
use crate::gateway::{ConnectionGateway, DedicatedConnection, Executor, QueryOutput};

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Handle on an open transaction
pub struct Transaction {
    conn: Mutex<Option<Box<dyn DedicatedConnection>>>,
    completed: AtomicBool,
}

impl Transaction {
    fn new(conn: Box<dyn DedicatedConnection>) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            completed: AtomicBool::new(false),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Run a statement inside the transaction
    pub async fn query(&self, sql: &str, params: &[Value]) -> DataResult<QueryOutput> {
        let mut guard = self.conn.lock().await;
        if self.is_completed() {
            return Err(DataError::TransactionCompleted);
        }
        let conn = guard.as_mut().ok_or(DataError::TransactionCompleted)?;
        conn.execute(sql, params).await
    }

    /// COMMIT; fails if the transaction already completed
    pub async fn commit(&self) -> DataResult<()> {
        let mut guard = self.conn.lock().await;
        if self.is_completed() {
            return Err(DataError::TransactionCompleted);
        }
        let conn = guard.as_mut().ok_or(DataError::TransactionCompleted)?;
        conn.execute("COMMIT", &[]).await?;
        self.completed.store(true, Ordering::SeqCst);
        debug!("transaction committed");
        Ok(())
    }

    /// ROLLBACK; a no-op once the transaction completed
    pub async fn rollback(&self) -> DataResult<()> {
        let mut guard = self.conn.lock().await;
        if self.completed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(conn) = guard.as_mut() else {
            return Ok(());
        };
        conn.execute("ROLLBACK", &[]).await?;
        debug!("transaction rolled back");
        Ok(())
    }

    /// Give the connection back to the pool, rolling back if still active
    ///
    /// Later calls do nothing.
    pub async fn release(&self) {
        if !self.is_completed() {
            if let Err(e) = self.rollback().await {
                warn!(error = %e, "rollback before release failed");
            }
        }
        if let Some(conn) = self.conn.lock().await.take() {
            conn.release();
        }
    }
}

#[async_trait]
impl Executor for Transaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> DataResult<QueryOutput> {
        self.query(sql, params).await
    }
}

/// Opens transactions on dedicated connections
#[derive(Clone)]
pub struct TransactionCoordinator {
    gateway: Arc<dyn ConnectionGateway>,
}

impl TransactionCoordinator {
    pub fn new(gateway: Arc<dyn ConnectionGateway>) -> Self {
        Self { gateway }
    }

    /// Acquire a connection and issue BEGIN
    ///
    /// The caller must commit or roll back, then `release`.
    #[instrument(skip(self))]
    pub async fn begin(&self, isolation: Option<IsolationLevel>) -> DataResult<Arc<Transaction>> {
        let mut conn = self.gateway.acquire().await?;
        let sql = match isolation {
            Some(level) => format!("BEGIN ISOLATION LEVEL {}", level),
            None => "BEGIN".to_string(),
        };
        if let Err(e) = conn.execute(&sql, &[]).await {
            conn.release();
            return Err(e);
        }
        Ok(Arc::new(Transaction::new(conn)))
    }

    /// Run `callback` in a transaction
    ///
    /// Commits when the callback succeeds and rolls back when it fails,
    /// returning the callback's own error. The connection is released
    /// exactly once on every path.
    pub async fn transaction<F, Fut, T, E>(&self, callback: F) -> Result<T, E>
    where
        F: FnOnce(Arc<Transaction>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DataError>,
    {
        self.run(None, callback).await
    }

    /// [`transaction`](Self::transaction) with an explicit isolation level
    pub async fn transaction_with_isolation<F, Fut, T, E>(
        &self,
        isolation: IsolationLevel,
        callback: F,
    ) -> Result<T, E>
    where
        F: FnOnce(Arc<Transaction>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DataError>,
    {
        self.run(Some(isolation), callback).await
    }

    async fn run<F, Fut, T, E>(&self, isolation: Option<IsolationLevel>, callback: F) -> Result<T, E>
    where
        F: FnOnce(Arc<Transaction>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DataError>,
    {
        let tx = self.begin(isolation).await?;

        let outcome = match callback(Arc::clone(&tx)).await {
            // The callback may have finished the transaction itself
            Ok(value) if tx.is_completed() => Ok(value),
            Ok(value) => match tx.commit().await {
                Ok(()) => Ok(value),
                Err(commit_err) => {
                    if let Err(e) = tx.rollback().await {
                        warn!(error = %e, "rollback after failed commit failed");
                    }
                    Err(commit_err.into())
                }
            },
            Err(err) => {
                if let Err(e) = tx.rollback().await {
                    warn!(error = %e, "rollback after failed transaction failed");
                }
                Err(err)
            }
        };

        tx.release().await;
        outcome
    }
}
