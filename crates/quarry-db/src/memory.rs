//! In-memory connection gateway
//!
//! Records every statement it is asked to run and answers through a
//! scripted responder. Used by tests throughout the crate and usable by
//! downstream crates that want to exercise repositories without Postgres.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use quarry_core::Value;

use crate::error::DataResult;
use crate::gateway::{ConnectionGateway, DedicatedConnection, Executor, PoolStats, QueryOutput};

/// Produces the result for a statement
pub type Responder = dyn Fn(&str, &[Value]) -> DataResult<QueryOutput> + Send + Sync;

/// A statement seen by the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    /// Dedicated connection the statement ran on, `None` for pooled calls
    pub connection: Option<usize>,
}

#[derive(Default)]
struct State {
    statements: Vec<Statement>,
    acquired: usize,
    released: usize,
}

/// Statement-recording gateway
#[derive(Clone)]
pub struct MemoryGateway {
    state: Arc<Mutex<State>>,
    responder: Arc<Responder>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    /// Gateway answering every statement with no rows
    pub fn new() -> Self {
        Self::with_responder(|_, _| Ok(QueryOutput::default()))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str, &[Value]) -> DataResult<QueryOutput> + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            responder: Arc::new(responder),
        }
    }

    /// Every statement so far, in issue order
    pub fn statements(&self) -> Vec<Statement> {
        self.state.lock().statements.clone()
    }

    pub fn sql_log(&self) -> Vec<String> {
        self.state
            .lock()
            .statements
            .iter()
            .map(|s| s.sql.clone())
            .collect()
    }

    /// Number of dedicated connections handed out
    pub fn acquired(&self) -> usize {
        self.state.lock().acquired
    }

    /// Number of dedicated connections given back
    pub fn released(&self) -> usize {
        self.state.lock().released
    }

    fn run(&self, sql: &str, params: &[Value], connection: Option<usize>) -> DataResult<QueryOutput> {
        self.state.lock().statements.push(Statement {
            sql: sql.to_string(),
            params: params.to_vec(),
            connection,
        });
        (self.responder)(sql, params)
    }
}

#[async_trait]
impl Executor for MemoryGateway {
    async fn execute(&self, sql: &str, params: &[Value]) -> DataResult<QueryOutput> {
        self.run(sql, params, None)
    }
}

#[async_trait]
impl ConnectionGateway for MemoryGateway {
    async fn acquire(&self) -> DataResult<Box<dyn DedicatedConnection>> {
        let id = {
            let mut state = self.state.lock();
            state.acquired += 1;
            state.acquired
        };
        Ok(Box::new(MemoryConnection {
            id,
            gateway: self.clone(),
        }))
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            size: state.acquired.saturating_sub(state.released) as u32,
            idle: 0,
        }
    }
}

/// Dedicated connection of a [`MemoryGateway`]
pub struct MemoryConnection {
    id: usize,
    gateway: MemoryGateway,
}

#[async_trait]
impl DedicatedConnection for MemoryConnection {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> DataResult<QueryOutput> {
        self.gateway.run(sql, params, Some(self.id))
    }

    async fn execute_batch(&mut self, sql: &str) -> DataResult<()> {
        self.gateway.run(sql, &[], Some(self.id)).map(|_| ())
    }

    fn release(self: Box<Self>) {
        self.gateway.state.lock().released += 1;
    }
}
