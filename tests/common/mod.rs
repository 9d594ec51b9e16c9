//! Scripted in-memory driver shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlbridge::db::{BoxConnection, Connection, Driver};
use sqlbridge::error::{DbError, DbResult};
use sqlbridge::models::{ColumnMetadata, CommandKind, Params, ResultSet, Row};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Everything the mock saw, plus the responses it should give.
#[derive(Default)]
pub struct MockState {
    /// `connect:<target>`, `begin`, `commit`, `rollback`, `close`
    pub calls: Mutex<Vec<String>>,
    /// SQL text handed to query, query_multiple and execute
    pub statements: Mutex<Vec<String>>,
    /// Batches returned by query / query_multiple, oldest first
    pub responses: Mutex<VecDeque<Vec<ResultSet>>>,
    /// Statements containing this text fail with an execution error
    pub fail_on: Mutex<Option<String>>,
    pub fail_connect: Mutex<bool>,
    pub fail_commit: Mutex<bool>,
    pub version: Mutex<Option<String>>,
    pub affected: Mutex<u64>,
    pub closes: AtomicUsize,
    pub version_probes: AtomicUsize,
}

impl MockState {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn last_statement(&self) -> String {
        self.statements.lock().unwrap().last().cloned().unwrap_or_default()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn respond(&self, sets: Vec<ResultSet>) {
        self.responses.lock().unwrap().push_back(sets);
    }

    pub fn fail_on(&self, needle: &str) {
        *self.fail_on.lock().unwrap() = Some(needle.to_string());
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn run(&self, sql: &str) -> DbResult<()> {
        self.statements.lock().unwrap().push(sql.to_string());
        match self.fail_on.lock().unwrap().as_deref() {
            Some(needle) if sql.contains(needle) => Err(DbError::execution(
                format!("scripted failure for '{}'", needle),
                Some("42000".to_string()),
                "mock driver",
            )),
            _ => Ok(()),
        }
    }

    fn next_response(&self) -> Vec<ResultSet> {
        self.responses.lock().unwrap().pop_front().unwrap_or_default()
    }
}

pub struct MockDriver {
    pub state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> (Arc<Self>, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        (
            Arc::new(Self {
                state: Arc::clone(&state),
            }),
            state,
        )
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn connect(&self, connection_string: &str) -> DbResult<BoxConnection> {
        if *self.state.fail_connect.lock().unwrap() {
            return Err(DbError::connection(
                format!("cannot reach {}", connection_string),
                "mock driver",
            ));
        }
        self.state.record(format!("connect:{}", connection_string));
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            data_source: connection_string.to_string(),
            open: false,
            closed: false,
        }))
    }
}

pub struct MockConnection {
    state: Arc<MockState>,
    data_source: String,
    open: bool,
    closed: bool,
}

#[async_trait]
impl Connection for MockConnection {
    fn data_source(&self) -> &str {
        &self.data_source
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn open(&mut self) -> DbResult<()> {
        self.open = true;
        Ok(())
    }

    async fn query(&mut self, sql: &str, _: &Params, _: Duration) -> DbResult<ResultSet> {
        self.state.run(sql)?;
        Ok(self.state.next_response().into_iter().next().unwrap_or_default())
    }

    async fn query_multiple(
        &mut self,
        sql: &str,
        _: &Params,
        _: Duration,
    ) -> DbResult<Vec<ResultSet>> {
        self.state.run(sql)?;
        Ok(self.state.next_response())
    }

    async fn execute(
        &mut self,
        sql: &str,
        _: &Params,
        _: CommandKind,
        _: Duration,
    ) -> DbResult<u64> {
        self.state.run(sql)?;
        Ok(*self.state.affected.lock().unwrap())
    }

    async fn server_version(&mut self) -> DbResult<Option<String>> {
        self.state.version_probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.version.lock().unwrap().clone())
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.state.record("begin");
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.state.record("commit");
        if *self.state.fail_commit.lock().unwrap() {
            return Err(DbError::execution("commit refused", None, "mock driver"));
        }
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.state.record("rollback");
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        if !self.closed {
            self.closed = true;
            self.open = false;
            self.state.closes.fetch_add(1, Ordering::SeqCst);
            self.state.record("close");
        }
        Ok(())
    }
}

/// Build a result set from column names and rows of values.
pub fn result_set(columns: &[&str], rows: Vec<Vec<JsonValue>>) -> ResultSet {
    let metadata = columns
        .iter()
        .map(|c| ColumnMetadata::new(*c, "BIGINT", true))
        .collect();
    let rows = rows
        .into_iter()
        .map(|values| {
            columns
                .iter()
                .map(|c| c.to_string())
                .zip(values)
                .collect::<Row>()
        })
        .collect();
    ResultSet::new(metadata, rows)
}

/// Count set followed by a page of `ids`, as a paging batch returns them.
pub fn page_batch(total: i64, columns: &[&str], rows: Vec<Vec<JsonValue>>) -> Vec<ResultSet> {
    vec![
        result_set(&["TOTAL"], vec![vec![JsonValue::from(total)]]),
        result_set(columns, rows),
    ]
}
