//! Thread-blocking surface.
//!
//! [`BlockingRepository`] drives the same execution core as
//! [`Repository`] on a private current-thread runtime, so both calling
//! conventions produce the same SQL, the same diagnostics events and the
//! same errors.
//!
//! The blocking calls must not be made from inside an async context; use
//! [`Repository`] there.

use crate::config::{PoolOptions, RepositoryConfig};
use crate::db::driver::Driver;
use crate::db::transaction::{Transaction, hand_over, hand_over_if, settle, settle_if};
use crate::error::{DbError, DbResult};
use crate::models::{
    CommandKind, PageRequest, PageResult, PagedTable, Query, ResultSet, Row, TransactionState,
};
use crate::repository::Repository;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::runtime::Runtime;

pub struct BlockingRepository {
    inner: Repository,
    runtime: Runtime,
}

impl BlockingRepository {
    pub fn new(config: RepositoryConfig, driver: Arc<dyn Driver>) -> DbResult<Self> {
        Self::from_repository(Repository::new(config, driver)?)
    }

    pub fn with_sqlx(config: RepositoryConfig, pool_options: PoolOptions) -> DbResult<Self> {
        Self::from_repository(Repository::with_sqlx(config, pool_options)?)
    }

    /// Wrap an existing repository. Pools opened through it afterwards belong
    /// to this repository's runtime.
    pub fn from_repository(inner: Repository) -> DbResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DbError::internal(format!("Failed to start blocking runtime: {}", e)))?;
        Ok(Self { inner, runtime })
    }

    pub fn config(&self) -> &RepositoryConfig {
        self.inner.config()
    }

    pub fn query(&self, query: impl Into<Query>) -> DbResult<Vec<Row>> {
        self.runtime.block_on(self.inner.query(query))
    }

    pub fn query_as<T: DeserializeOwned>(&self, query: impl Into<Query>) -> DbResult<Vec<T>> {
        self.runtime.block_on(self.inner.query_as(query))
    }

    pub fn query_one(&self, query: impl Into<Query>) -> DbResult<Option<Row>> {
        self.runtime.block_on(self.inner.query_one(query))
    }

    pub fn query_one_as<T: DeserializeOwned>(
        &self,
        query: impl Into<Query>,
    ) -> DbResult<Option<T>> {
        self.runtime.block_on(self.inner.query_one_as(query))
    }

    pub fn query_table(&self, query: impl Into<Query>) -> DbResult<ResultSet> {
        self.runtime.block_on(self.inner.query_table(query))
    }

    pub fn execute(&self, query: impl Into<Query>) -> DbResult<u64> {
        self.runtime.block_on(self.inner.execute(query))
    }

    pub fn execute_command(&self, query: impl Into<Query>, kind: CommandKind) -> DbResult<u64> {
        self.runtime.block_on(self.inner.execute_command(query, kind))
    }

    pub fn execute_scalar(&self, query: impl Into<Query>) -> DbResult<Option<JsonValue>> {
        self.runtime.block_on(self.inner.execute_scalar(query))
    }

    pub fn page(&self, request: &PageRequest) -> DbResult<PageResult<Row>> {
        self.runtime.block_on(self.inner.page(request))
    }

    pub fn page_as<T: DeserializeOwned>(&self, request: &PageRequest) -> DbResult<PageResult<T>> {
        self.runtime.block_on(self.inner.page_as(request))
    }

    pub fn page_table(&self, request: &PageRequest) -> DbResult<PagedTable> {
        self.runtime.block_on(self.inner.page_table(request))
    }

    pub fn query_multiple(&self, query: impl Into<Query>) -> DbResult<Vec<Vec<Row>>> {
        self.runtime.block_on(self.inner.query_multiple(query))
    }

    pub fn begin_transaction(&self) -> DbResult<BlockingTransaction<'_>> {
        let inner = self
            .runtime
            .block_on(Transaction::begin(Arc::clone(self.inner.core())))?;
        Ok(BlockingTransaction {
            inner,
            runtime: &self.runtime,
        })
    }

    /// Run `work` in a transaction: commit on `Ok`, roll back on `Err`.
    pub fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut BlockingTransaction<'_>) -> Result<T, E>,
        E: From<DbError>,
    {
        let mut tx = self.begin_transaction().map_err(E::from)?;
        let outcome = work(&mut tx);
        self.runtime.block_on(settle(&mut tx.inner, outcome))
    }

    /// Like [`transaction`](Self::transaction), with failures handed to
    /// `on_rollback` instead of returned.
    pub fn transaction_or_else<T, E, F, H>(&self, work: F, on_rollback: H) -> Result<Option<T>, E>
    where
        F: FnOnce(&mut BlockingTransaction<'_>) -> Result<T, E>,
        H: FnOnce(E) -> Result<(), E>,
        E: From<DbError>,
    {
        let mut tx = self.begin_transaction().map_err(E::from)?;
        let outcome = work(&mut tx);
        hand_over(self.runtime.block_on(settle(&mut tx.inner, outcome)), on_rollback)
    }

    /// Commit on `Ok(true)`; roll back on `Ok(false)` or `Err`.
    pub fn transaction_if<E, F>(&self, work: F) -> Result<bool, E>
    where
        F: FnOnce(&mut BlockingTransaction<'_>) -> Result<bool, E>,
        E: From<DbError>,
    {
        let mut tx = self.begin_transaction().map_err(E::from)?;
        let outcome = work(&mut tx);
        self.runtime.block_on(settle_if(&mut tx.inner, outcome))
    }

    /// Boolean variant with a rollback handler: `None` for a declined
    /// outcome, `Some(error)` for a failure.
    pub fn transaction_if_or_else<E, F, H>(&self, work: F, on_rollback: H) -> Result<bool, E>
    where
        F: FnOnce(&mut BlockingTransaction<'_>) -> Result<bool, E>,
        H: FnOnce(Option<E>) -> Result<(), E>,
        E: From<DbError>,
    {
        let mut tx = self.begin_transaction().map_err(E::from)?;
        let outcome = work(&mut tx);
        hand_over_if(
            self.runtime.block_on(settle_if(&mut tx.inner, outcome)),
            on_rollback,
        )
    }
}

impl std::fmt::Debug for BlockingRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingRepository")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

/// Blocking handle to an active transaction.
///
/// Dropping an active handle rolls it back.
#[derive(Debug)]
pub struct BlockingTransaction<'r> {
    inner: Transaction,
    runtime: &'r Runtime,
}

impl BlockingTransaction<'_> {
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn state(&self) -> TransactionState {
        self.inner.state()
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    pub fn commit(&mut self) -> DbResult<()> {
        self.runtime.block_on(self.inner.commit())
    }

    pub fn rollback(&mut self) -> DbResult<()> {
        self.runtime.block_on(self.inner.rollback())
    }

    pub fn close(&mut self) {
        self.runtime.block_on(self.inner.close())
    }

    pub fn query(&mut self, query: impl Into<Query>) -> DbResult<Vec<Row>> {
        self.runtime.block_on(self.inner.query(query))
    }

    pub fn query_as<T: DeserializeOwned>(&mut self, query: impl Into<Query>) -> DbResult<Vec<T>> {
        self.runtime.block_on(self.inner.query_as(query))
    }

    pub fn query_one(&mut self, query: impl Into<Query>) -> DbResult<Option<Row>> {
        self.runtime.block_on(self.inner.query_one(query))
    }

    pub fn query_one_as<T: DeserializeOwned>(
        &mut self,
        query: impl Into<Query>,
    ) -> DbResult<Option<T>> {
        self.runtime.block_on(self.inner.query_one_as(query))
    }

    pub fn query_table(&mut self, query: impl Into<Query>) -> DbResult<ResultSet> {
        self.runtime.block_on(self.inner.query_table(query))
    }

    pub fn execute(&mut self, query: impl Into<Query>) -> DbResult<u64> {
        self.runtime.block_on(self.inner.execute(query))
    }

    pub fn execute_command(&mut self, query: impl Into<Query>, kind: CommandKind) -> DbResult<u64> {
        self.runtime
            .block_on(self.inner.execute_command(query, kind))
    }

    pub fn execute_scalar(&mut self, query: impl Into<Query>) -> DbResult<Option<JsonValue>> {
        self.runtime.block_on(self.inner.execute_scalar(query))
    }

    pub fn page(&mut self, request: &PageRequest) -> DbResult<PageResult<Row>> {
        self.runtime.block_on(self.inner.page(request))
    }

    pub fn page_as<T: DeserializeOwned>(
        &mut self,
        request: &PageRequest,
    ) -> DbResult<PageResult<T>> {
        self.runtime.block_on(self.inner.page_as(request))
    }

    pub fn page_table(&mut self, request: &PageRequest) -> DbResult<PagedTable> {
        self.runtime.block_on(self.inner.page_table(request))
    }

    pub fn query_multiple(&mut self, query: impl Into<Query>) -> DbResult<Vec<Vec<Row>>> {
        self.runtime.block_on(self.inner.query_multiple(query))
    }
}

impl Drop for BlockingTransaction<'_> {
    fn drop(&mut self) {
        if self.inner.is_active() {
            self.runtime.block_on(self.inner.close());
        }
    }
}
