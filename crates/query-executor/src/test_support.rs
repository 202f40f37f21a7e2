//! Scripted in-memory backend for executor tests

use crate::statement::StatementKind;
use crate::transaction::{PreparedStatement, Transaction};
use parking_lot::Mutex;
use query_core::{BoundParameter, QueryError, Result, Row, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

type QueryScript = Box<dyn Fn(&[Value]) -> Vec<Row> + Send + Sync>;

/// One interaction with the backend, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Prepare { sql: String, timeout: Option<Duration> },
    Bind { sql: String, values: Vec<Value> },
    ExecuteQuery { sql: String },
    ExecuteUpdate { sql: String },
    AddBatch { sql: String },
    ExecuteBatch { sql: String, elements: usize },
    CloseStatement { sql: String },
    Commit,
    Rollback,
    CloseTransaction,
}

impl Call {
    pub fn is_query(&self) -> bool {
        matches!(self, Call::ExecuteQuery { .. })
    }
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    queries: HashMap<String, QueryScript>,
    outputs: HashMap<(String, usize), Value>,
    key_generators: HashMap<String, (String, i64)>,
    failing_updates: HashSet<String>,
    failing_batches: HashSet<String>,
    fail_rollback: bool,
    transaction_timeout: Option<Duration>,
}

impl State {
    fn next_keys(&mut self, sql: &str, count: usize) -> Vec<Row> {
        match self.key_generators.get_mut(sql) {
            Some((column, next)) => (0..count)
                .map(|_| {
                    let row = Row::new().with(column.as_str(), *next);
                    *next += 1;
                    row
                })
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Handle shared by a test and every transaction it hands to executors.
#[derive(Clone, Default)]
pub struct Backend {
    state: Arc<Mutex<State>>,
}

impl Backend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction(&self) -> ScriptedTransaction {
        ScriptedTransaction {
            state: Arc::clone(&self.state),
        }
    }

    /// Rows returned for `sql`, computed from the bound input values.
    pub fn on_query<F>(&self, sql: &str, script: F)
    where
        F: Fn(&[Value]) -> Vec<Row> + Send + Sync + 'static,
    {
        self.state
            .lock()
            .queries
            .insert(sql.to_string(), Box::new(script));
    }

    pub fn on_output(&self, sql: &str, index: usize, value: Value) {
        self.state
            .lock()
            .outputs
            .insert((sql.to_string(), index), value);
    }

    /// Every executed element of `sql` generates one key row, counting up
    /// from `start`.
    pub fn generate_keys(&self, sql: &str, column: &str, start: i64) {
        self.state
            .lock()
            .key_generators
            .insert(sql.to_string(), (column.to_string(), start));
    }

    pub fn fail_update(&self, sql: &str) {
        self.state.lock().failing_updates.insert(sql.to_string());
    }

    pub fn fail_batch(&self, sql: &str) {
        self.state.lock().failing_batches.insert(sql.to_string());
    }

    pub fn fail_rollback(&self) {
        self.state.lock().fail_rollback = true;
    }

    pub fn set_transaction_timeout(&self, timeout: Duration) {
        self.state.lock().transaction_timeout = Some(timeout);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Call) -> bool,
    {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }
}

pub struct ScriptedTransaction {
    state: Arc<Mutex<State>>,
}

impl Transaction for ScriptedTransaction {
    fn prepare(
        &mut self,
        sql: &str,
        _kind: StatementKind,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn PreparedStatement>> {
        self.state.lock().calls.push(Call::Prepare {
            sql: sql.to_string(),
            timeout,
        });
        Ok(Box::new(ScriptedStatement {
            sql: sql.to_string(),
            state: Arc::clone(&self.state),
            bound: Vec::new(),
            batch: Vec::new(),
            generated: Vec::new(),
        }))
    }

    fn commit(&mut self) -> Result<()> {
        self.state.lock().calls.push(Call::Commit);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Rollback);
        if state.fail_rollback {
            return Err(QueryError::ExecutionError("connection lost".to_string()));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.state.lock().calls.push(Call::CloseTransaction);
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        self.state.lock().transaction_timeout
    }
}

struct ScriptedStatement {
    sql: String,
    state: Arc<Mutex<State>>,
    bound: Vec<Value>,
    batch: Vec<Vec<Value>>,
    generated: Vec<Row>,
}

impl ScriptedStatement {
    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

impl PreparedStatement for ScriptedStatement {
    fn bind(&mut self, parameters: &[BoundParameter]) -> Result<()> {
        self.bound = parameters.iter().map(|p| p.value.clone()).collect();
        self.record(Call::Bind {
            sql: self.sql.clone(),
            values: self.bound.clone(),
        });
        Ok(())
    }

    fn execute_query(&mut self) -> Result<Vec<Row>> {
        let state = {
            let mut state = self.state.lock();
            state.calls.push(Call::ExecuteQuery {
                sql: self.sql.clone(),
            });
            state
        };
        Ok(state
            .queries
            .get(&self.sql)
            .map(|script| script(&self.bound))
            .unwrap_or_default())
    }

    fn execute_update(&mut self) -> Result<i64> {
        let mut state = self.state.lock();
        state.calls.push(Call::ExecuteUpdate {
            sql: self.sql.clone(),
        });
        if state.failing_updates.contains(&self.sql) {
            return Err(QueryError::ExecutionError("constraint violation".to_string()));
        }
        self.generated = state.next_keys(&self.sql, 1);
        Ok(1)
    }

    fn add_batch(&mut self) -> Result<()> {
        self.batch.push(std::mem::take(&mut self.bound));
        self.record(Call::AddBatch {
            sql: self.sql.clone(),
        });
        Ok(())
    }

    fn execute_batch(&mut self) -> Result<Vec<i64>> {
        let elements = std::mem::take(&mut self.batch).len();
        let mut state = self.state.lock();
        state.calls.push(Call::ExecuteBatch {
            sql: self.sql.clone(),
            elements,
        });
        if state.failing_batches.contains(&self.sql) {
            return Err(QueryError::ExecutionError("duplicate key".to_string()));
        }
        self.generated = state.next_keys(&self.sql, elements);
        Ok(vec![1; elements])
    }

    fn generated_keys(&mut self) -> Result<Vec<Row>> {
        Ok(std::mem::take(&mut self.generated))
    }

    fn output_parameter(&mut self, index: usize) -> Result<Value> {
        Ok(self
            .state
            .lock()
            .outputs
            .get(&(self.sql.clone(), index))
            .cloned()
            .unwrap_or_default())
    }

    fn close(&mut self) -> Result<()> {
        self.record(Call::CloseStatement {
            sql: self.sql.clone(),
        });
        Ok(())
    }
}
