//! Transaction lifecycle.
//!
//! A [`Transaction`] owns exactly one open connection from `begin` until it
//! is committed or rolled back; both end states are terminal and release the
//! connection. Statements issued through the handle run on that connection.
//!
//! The `settle*` functions turn the outcome of a unit of work into a commit
//! or a rollback. They back the run-in-transaction helpers of both the async
//! and the blocking repository.

use crate::db::driver::BoxConnection;
use crate::db::executor::{Core, Scope};
use crate::error::{DbError, DbResult};
use crate::models::{
    CommandKind, PageRequest, PageResult, PagedTable, Query, ResultSet, Row, TransactionState,
    decode_row,
};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handle to an active database transaction.
pub struct Transaction {
    id: String,
    core: Arc<Core>,
    conn: Option<BoxConnection>,
    state: TransactionState,
}

impl Transaction {
    /// Acquire a primary connection and start a transaction on it.
    pub(crate) async fn begin(core: Arc<Core>) -> DbResult<Self> {
        let mut conn = core.provider().acquire_primary(core.config()).await?;
        if let Err(e) = conn.begin().await {
            if let Err(close_err) = conn.close().await {
                warn!(error = %close_err, "Failed to close connection after BEGIN failed");
            }
            return Err(e);
        }

        let id = generate_transaction_id();
        info!(
            transaction_id = %id,
            data_source = %conn.data_source(),
            "Transaction started"
        );

        Ok(Self {
            id,
            core,
            conn: Some(conn),
            state: TransactionState::Active,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active() && self.conn.is_some()
    }

    fn not_active(&self) -> DbError {
        DbError::transaction_state(
            format!("Transaction {} is not active", self.id),
            self.state,
        )
    }

    fn scope(&mut self) -> DbResult<(&Core, Scope<'_>)> {
        if !self.state.is_active() {
            return Err(self.not_active());
        }
        match self.conn.as_mut() {
            Some(conn) => Ok((&*self.core, Scope::Ambient(conn))),
            None => Err(DbError::transaction_state(
                format!("Transaction {} has no connection", self.id),
                self.state,
            )),
        }
    }

    /// Commit and release the connection.
    ///
    /// A failed commit still ends the transaction (as rolled back).
    pub async fn commit(&mut self) -> DbResult<()> {
        if !self.is_active() {
            return Err(self.not_active());
        }
        let result = match self.conn.as_mut() {
            Some(conn) => conn.commit().await,
            None => Err(self.not_active()),
        };

        match &result {
            Ok(()) => {
                self.state = TransactionState::Committed;
                info!(transaction_id = %self.id, "Transaction committed");
            }
            Err(e) => {
                self.state = TransactionState::RolledBack;
                warn!(transaction_id = %self.id, error = %e, "Commit failed, rolling back");
                if let Some(conn) = self.conn.as_mut() {
                    if let Err(rollback_err) = conn.rollback().await {
                        warn!(
                            transaction_id = %self.id,
                            error = %rollback_err,
                            "Rollback after failed commit also failed"
                        );
                    }
                }
            }
        }

        self.release().await;
        result
    }

    /// Roll back and release the connection.
    pub async fn rollback(&mut self) -> DbResult<()> {
        if !self.is_active() {
            return Err(self.not_active());
        }
        let result = match self.conn.as_mut() {
            Some(conn) => conn.rollback().await,
            None => Err(self.not_active()),
        };
        self.state = TransactionState::RolledBack;
        match &result {
            Ok(()) => info!(transaction_id = %self.id, "Transaction rolled back"),
            Err(e) => warn!(transaction_id = %self.id, error = %e, "Rollback failed"),
        }

        self.release().await;
        result
    }

    /// Roll back if still active, then release. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if self.is_active() {
            // rollback() already logs its own failure
            let _ = self.rollback().await;
        }
        self.release().await;
    }

    async fn release(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                warn!(
                    transaction_id = %self.id,
                    error = %e,
                    "Failed to close transaction connection"
                );
            }
        }
    }

    // ---------------------------------------------------------------------
    // Statements on the transaction's connection
    // ---------------------------------------------------------------------

    pub async fn query(&mut self, query: impl Into<Query>) -> DbResult<Vec<Row>> {
        let query = query.into();
        let (core, scope) = self.scope()?;
        core.query(scope, &query).await
    }

    pub async fn query_as<T: DeserializeOwned>(
        &mut self,
        query: impl Into<Query>,
    ) -> DbResult<Vec<T>> {
        self.query(query).await?.into_iter().map(decode_row).collect()
    }

    pub async fn query_one(&mut self, query: impl Into<Query>) -> DbResult<Option<Row>> {
        let query = query.into();
        let (core, scope) = self.scope()?;
        core.query_one(scope, &query).await
    }

    pub async fn query_one_as<T: DeserializeOwned>(
        &mut self,
        query: impl Into<Query>,
    ) -> DbResult<Option<T>> {
        self.query_one(query).await?.map(decode_row).transpose()
    }

    pub async fn query_table(&mut self, query: impl Into<Query>) -> DbResult<ResultSet> {
        let query = query.into();
        let (core, scope) = self.scope()?;
        core.query_table(scope, "query_table", &query).await
    }

    pub async fn execute(&mut self, query: impl Into<Query>) -> DbResult<u64> {
        self.execute_command(query, CommandKind::Text).await
    }

    pub async fn execute_command(
        &mut self,
        query: impl Into<Query>,
        kind: CommandKind,
    ) -> DbResult<u64> {
        let query = query.into();
        let (core, scope) = self.scope()?;
        core.execute(scope, &query, kind).await
    }

    pub async fn execute_scalar(&mut self, query: impl Into<Query>) -> DbResult<Option<JsonValue>> {
        let query = query.into();
        let (core, scope) = self.scope()?;
        core.execute_scalar(scope, &query).await
    }

    pub async fn page(&mut self, request: &PageRequest) -> DbResult<PageResult<Row>> {
        let (core, scope) = self.scope()?;
        core.page(scope, request).await
    }

    pub async fn page_as<T: DeserializeOwned>(
        &mut self,
        request: &PageRequest,
    ) -> DbResult<PageResult<T>> {
        let page = self.page(request).await?;
        Ok(PageResult {
            rows: page.rows.into_iter().map(decode_row).collect::<DbResult<_>>()?,
            total: page.total,
        })
    }

    pub async fn page_table(&mut self, request: &PageRequest) -> DbResult<PagedTable> {
        let (core, scope) = self.scope()?;
        core.page_table(scope, request).await
    }

    pub async fn query_multiple(&mut self, query: impl Into<Query>) -> DbResult<Vec<Vec<Row>>> {
        let query = query.into();
        let (core, scope) = self.scope()?;
        core.query_multiple(scope, &query).await
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("has_connection", &self.conn.is_some())
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.conn.is_some() {
            // The driver connection detaches itself instead of returning to a pool.
            warn!(
                transaction_id = %self.id,
                state = %self.state,
                "Transaction dropped without commit or rollback"
            );
        }
    }
}

/// Commit on `Ok`, roll back on `Err`.
///
/// If the work already ended the transaction itself, `Ok` is returned as is.
/// Rollback failures are logged; the work's own error is what propagates.
pub(crate) async fn settle<T, E>(tx: &mut Transaction, outcome: Result<T, E>) -> Result<T, E>
where
    E: From<DbError>,
{
    match outcome {
        Ok(value) => {
            if tx.is_active() {
                tx.commit().await.map_err(E::from)?;
            } else {
                debug!(
                    transaction_id = %tx.id,
                    state = %tx.state,
                    "Transaction already ended by unit of work"
                );
            }
            Ok(value)
        }
        Err(err) => {
            tx.close().await;
            Err(err)
        }
    }
}

/// Commit on `Ok(true)`; roll back on `Ok(false)` or `Err`.
///
/// Work that rolled back its own transaction reports `false` even when it
/// returned `Ok(true)`.
pub(crate) async fn settle_if<E>(tx: &mut Transaction, outcome: Result<bool, E>) -> Result<bool, E>
where
    E: From<DbError>,
{
    match outcome {
        Ok(false) => {
            debug!(transaction_id = %tx.id, "Unit of work declined");
            tx.close().await;
            Ok(false)
        }
        Ok(true) if tx.state == TransactionState::RolledBack => {
            debug!(
                transaction_id = %tx.id,
                "Unit of work rolled back its own transaction"
            );
            Ok(false)
        }
        other => settle(tx, other).await,
    }
}

/// Hand a failure to the rollback handler instead of propagating it.
pub(crate) fn hand_over<T, E, H>(settled: Result<T, E>, on_rollback: H) -> Result<Option<T>, E>
where
    H: FnOnce(E) -> Result<(), E>,
{
    match settled {
        Ok(value) => Ok(Some(value)),
        Err(err) => on_rollback(err).map(|_| None),
    }
}

/// Like [`hand_over`] for boolean work: the handler gets `None` for a
/// declined outcome and `Some(error)` for a failure.
pub(crate) fn hand_over_if<E, H>(settled: Result<bool, E>, on_rollback: H) -> Result<bool, E>
where
    H: FnOnce(Option<E>) -> Result<(), E>,
{
    match settled {
        Ok(true) => Ok(true),
        Ok(false) => on_rollback(None).map(|_| false),
        Err(err) => on_rollback(Some(err)).map(|_| false),
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}
