//! Async repository surface.
//!
//! A [`Repository`] binds a [`RepositoryConfig`] to a [`Driver`]. Each
//! operation outside a transaction acquires a routed connection, runs one
//! statement (or one batch) and closes the connection again. Statements
//! issued on a [`Transaction`] reuse its connection instead.

use crate::config::{PoolOptions, RepositoryConfig};
use crate::db::driver::Driver;
use crate::db::executor::{Core, Scope};
use crate::db::pool::SqlxDriver;
use crate::db::provider::ConnectionProvider;
use crate::db::transaction::{Transaction, hand_over, hand_over_if, settle, settle_if};
use crate::error::{DbError, DbResult};
use crate::models::{
    CommandKind, PageRequest, PageResult, PagedTable, Query, ResultSet, Row, decode_row,
};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct Repository {
    core: Arc<Core>,
}

impl Repository {
    /// Create a repository over `driver`. The configuration is validated here.
    pub fn new(config: RepositoryConfig, driver: Arc<dyn Driver>) -> DbResult<Self> {
        config.validate()?;
        info!(
            dialect = %config.dialect,
            replicas = config.replicas.len(),
            is_master = config.is_master,
            "Repository created"
        );
        let provider = ConnectionProvider::new(driver);
        Ok(Self {
            core: Arc::new(Core::new(config, provider)),
        })
    }

    /// Create a repository backed by the bundled sqlx driver.
    pub fn with_sqlx(config: RepositoryConfig, pool_options: PoolOptions) -> DbResult<Self> {
        pool_options.validate().map_err(DbError::invalid_input)?;
        Self::new(config, Arc::new(SqlxDriver::new(pool_options)))
    }

    pub fn config(&self) -> &RepositoryConfig {
        self.core.config()
    }

    pub(crate) fn core(&self) -> &Arc<Core> {
        &self.core
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    pub async fn query(&self, query: impl Into<Query>) -> DbResult<Vec<Row>> {
        self.core.query(Scope::Fresh, &query.into()).await
    }

    pub async fn query_as<T: DeserializeOwned>(&self, query: impl Into<Query>) -> DbResult<Vec<T>> {
        self.query(query).await?.into_iter().map(decode_row).collect()
    }

    /// First row, or `None` when the query returns nothing.
    pub async fn query_one(&self, query: impl Into<Query>) -> DbResult<Option<Row>> {
        self.core.query_one(Scope::Fresh, &query.into()).await
    }

    pub async fn query_one_as<T: DeserializeOwned>(
        &self,
        query: impl Into<Query>,
    ) -> DbResult<Option<T>> {
        self.query_one(query).await?.map(decode_row).transpose()
    }

    /// Rows together with column metadata.
    pub async fn query_table(&self, query: impl Into<Query>) -> DbResult<ResultSet> {
        self.core
            .query_table(Scope::Fresh, "query_table", &query.into())
            .await
    }

    /// Run a non-query command and return the affected row count.
    pub async fn execute(&self, query: impl Into<Query>) -> DbResult<u64> {
        self.execute_command(query, CommandKind::Text).await
    }

    pub async fn execute_command(
        &self,
        query: impl Into<Query>,
        kind: CommandKind,
    ) -> DbResult<u64> {
        self.core.execute(Scope::Fresh, &query.into(), kind).await
    }

    /// First column of the first row. `None` for no rows or SQL NULL.
    pub async fn execute_scalar(&self, query: impl Into<Query>) -> DbResult<Option<JsonValue>> {
        self.core.execute_scalar(Scope::Fresh, &query.into()).await
    }

    /// One page of rows plus the total row count, in a single round trip.
    pub async fn page(&self, request: &PageRequest) -> DbResult<PageResult<Row>> {
        self.core.page(Scope::Fresh, request).await
    }

    pub async fn page_as<T: DeserializeOwned>(
        &self,
        request: &PageRequest,
    ) -> DbResult<PageResult<T>> {
        let page = self.page(request).await?;
        Ok(PageResult {
            rows: page.rows.into_iter().map(decode_row).collect::<DbResult<_>>()?,
            total: page.total,
        })
    }

    pub async fn page_table(&self, request: &PageRequest) -> DbResult<PagedTable> {
        self.core.page_table(Scope::Fresh, request).await
    }

    /// Run a batch and return every result set it produces, in order.
    pub async fn query_multiple(&self, query: impl Into<Query>) -> DbResult<Vec<Vec<Row>>> {
        self.core.query_multiple(Scope::Fresh, &query.into()).await
    }

    // ---------------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------------

    /// Open a transaction on a freshly acquired connection.
    pub async fn begin_transaction(&self) -> DbResult<Transaction> {
        Transaction::begin(Arc::clone(&self.core)).await
    }

    /// Run `work` in a transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// The error returned by `work` is propagated after the rollback.
    pub async fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: AsyncFnOnce(&mut Transaction) -> Result<T, E>,
        E: From<DbError>,
    {
        let mut tx = self.begin_transaction().await.map_err(E::from)?;
        let outcome = work(&mut tx).await;
        settle(&mut tx, outcome).await
    }

    /// Like [`transaction`](Self::transaction), but a failure is passed to
    /// `on_rollback` after the rollback instead of being returned.
    ///
    /// Yields `Ok(None)` when the handler accepts the failure. The handler
    /// may return an error to re-raise it. A failure to begin is returned
    /// directly since nothing was rolled back.
    pub async fn transaction_or_else<T, E, F, H>(&self, work: F, on_rollback: H) -> Result<Option<T>, E>
    where
        F: AsyncFnOnce(&mut Transaction) -> Result<T, E>,
        H: FnOnce(E) -> Result<(), E>,
        E: From<DbError>,
    {
        let mut tx = self.begin_transaction().await.map_err(E::from)?;
        let outcome = work(&mut tx).await;
        hand_over(settle(&mut tx, outcome).await, on_rollback)
    }

    /// Run boolean `work` in a transaction: commit on `Ok(true)`, roll back
    /// on `Ok(false)` or `Err`.
    pub async fn transaction_if<E, F>(&self, work: F) -> Result<bool, E>
    where
        F: AsyncFnOnce(&mut Transaction) -> Result<bool, E>,
        E: From<DbError>,
    {
        let mut tx = self.begin_transaction().await.map_err(E::from)?;
        let outcome = work(&mut tx).await;
        settle_if(&mut tx, outcome).await
    }

    /// Boolean variant with a rollback handler. The handler receives `None`
    /// when `work` declined and `Some(error)` when it failed; either way the
    /// call yields `Ok(false)` unless the handler returns an error.
    pub async fn transaction_if_or_else<E, F, H>(&self, work: F, on_rollback: H) -> Result<bool, E>
    where
        F: AsyncFnOnce(&mut Transaction) -> Result<bool, E>,
        H: FnOnce(Option<E>) -> Result<(), E>,
        E: From<DbError>,
    {
        let mut tx = self.begin_transaction().await.map_err(E::from)?;
        let outcome = work(&mut tx).await;
        hand_over_if(settle_if(&mut tx, outcome).await, on_rollback)
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("config", self.core.config())
            .finish()
    }
}
