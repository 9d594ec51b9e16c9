//! Statement execution core.
//!
//! Every public operation (query, execute, scalar, page, multiple result
//! sets) runs through [`Core::dispatch`], which owns the shared protocol:
//!
//! 1. complete CTE prologues with `SELECT * FROM T`
//! 2. synthesize paging SQL for page requests
//! 3. apply the SQL intercept hook
//! 4. pick the connection: the ambient transaction's, or a fresh one that is
//!    closed again on every exit path
//! 5. bracket the driver call with diagnostics events
//!
//! Errors from the driver are returned unchanged after the `error-execute`
//! event has been written.

use crate::config::RepositoryConfig;
use crate::db::driver::{BoxConnection, parse_major_version};
use crate::db::paging::PageStrategy;
use crate::db::provider::ConnectionProvider;
use crate::diagnostics::{self, DiagnosticEvent, EventKind};
use crate::error::{DbError, DbResult};
use crate::models::{
    CommandKind, PageRequest, PageResult, PagedTable, Query, ROW_NUMBER_COLUMN, ResultSet, Row,
};
use serde_json::Value as JsonValue;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Where a statement runs.
pub(crate) enum Scope<'a> {
    /// Acquire a connection for this statement only.
    Fresh,
    /// Use the connection bound to an active transaction and leave it open.
    Ambient(&'a mut BoxConnection),
}

/// A unit of work for the driver.
#[derive(Clone, Copy)]
pub(crate) enum Command<'q> {
    Query(&'q Query),
    Multiple(&'q Query),
    Execute(&'q Query, CommandKind),
    Page(&'q PageRequest),
}

pub(crate) enum Output {
    Set(ResultSet),
    Sets(Vec<ResultSet>),
    Affected(u64),
    Page {
        sets: Vec<ResultSet>,
        strategy: PageStrategy,
    },
}

/// Shared state of a repository: configuration, routing and the cached
/// server version.
pub(crate) struct Core {
    config: RepositoryConfig,
    provider: ConnectionProvider,
    server_major: OnceLock<Option<u32>>,
}

impl Core {
    pub(crate) fn new(config: RepositoryConfig, provider: ConnectionProvider) -> Self {
        Self {
            config,
            provider,
            server_major: OnceLock::new(),
        }
    }

    pub(crate) fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub(crate) fn provider(&self) -> &ConnectionProvider {
        &self.provider
    }

    /// Run `command` in `scope`.
    pub(crate) async fn dispatch(
        &self,
        scope: Scope<'_>,
        operation: &'static str,
        command: Command<'_>,
    ) -> DbResult<Output> {
        match scope {
            Scope::Ambient(conn) => self.execute_on(conn, operation, command).await,
            Scope::Fresh => {
                let mut conn = self.provider.acquire(&self.config).await?;
                let result = self.execute_on(&mut conn, operation, command).await;
                if let Err(e) = conn.close().await {
                    warn!(
                        error = %e,
                        data_source = %conn.data_source(),
                        "Failed to close connection"
                    );
                }
                result
            }
        }
    }

    async fn execute_on(
        &self,
        conn: &mut BoxConnection,
        operation: &'static str,
        command: Command<'_>,
    ) -> DbResult<Output> {
        let timeout = self.config.command_timeout;

        let (sql, params, strategy) = match command {
            Command::Page(request) => {
                request.validate()?;
                let major = self.server_major(conn).await?;
                let built =
                    self.config
                        .dialect
                        .build_page_sql(request, &self.config.count_syntax, major);
                (built.sql, &request.params, Some(built.strategy))
            }
            Command::Query(query) | Command::Multiple(query) | Command::Execute(query, _) => {
                (complete_cte(query), &query.params, None)
            }
        };
        let sql = match &self.config.sql_intercept {
            Some(intercept) => intercept(&sql, params),
            None => sql,
        };

        let channel = diagnostics::channel();
        let operation_id = Uuid::new_v4();
        if channel.is_enabled(EventKind::BeforeExecute) {
            channel.write(&DiagnosticEvent::new(
                operation_id,
                EventKind::BeforeExecute,
                operation,
                &sql,
                params,
                conn.data_source(),
                None,
                None,
            ));
        }

        debug!(
            operation,
            sql = %sql,
            params = params.len(),
            timeout_secs = timeout.as_secs(),
            "Executing statement"
        );

        let started = Instant::now();
        let result = match command {
            Command::Query(_) => conn.query(&sql, params, timeout).await.map(Output::Set),
            Command::Multiple(_) => conn
                .query_multiple(&sql, params, timeout)
                .await
                .map(Output::Sets),
            Command::Execute(_, kind) => conn
                .execute(&sql, params, kind, timeout)
                .await
                .map(Output::Affected),
            Command::Page(_) => conn
                .query_multiple(&sql, params, timeout)
                .await
                .map(|sets| Output::Page {
                    sets,
                    strategy: strategy.unwrap_or(PageStrategy::LimitOffset),
                }),
        };
        let elapsed_millis = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &result {
            Ok(_) => {
                if channel.is_enabled(EventKind::AfterExecute) {
                    channel.write(&DiagnosticEvent::new(
                        operation_id,
                        EventKind::AfterExecute,
                        operation,
                        &sql,
                        params,
                        conn.data_source(),
                        Some(elapsed_millis),
                        None,
                    ));
                }
            }
            Err(e) => {
                debug!(operation, error = %e, elapsed_ms = elapsed_millis, "Statement failed");
                if channel.is_enabled(EventKind::ErrorExecute) {
                    channel.write(&DiagnosticEvent::new(
                        operation_id,
                        EventKind::ErrorExecute,
                        operation,
                        &sql,
                        params,
                        conn.data_source(),
                        Some(elapsed_millis),
                        Some(e),
                    ));
                }
            }
        }

        result
    }

    /// Server major version for dialects whose paging depends on it.
    /// Detected once per repository unless pinned in the configuration.
    async fn server_major(&self, conn: &mut BoxConnection) -> DbResult<Option<u32>> {
        if !self.config.dialect.needs_server_version() {
            return Ok(None);
        }
        if let Some(pinned) = self.config.server_version {
            return Ok(Some(pinned));
        }
        if let Some(cached) = self.server_major.get() {
            return Ok(*cached);
        }

        let version = conn.server_version().await?;
        let major = version.as_deref().and_then(parse_major_version);
        debug!(version = ?version, major = ?major, "Detected server version");
        Ok(*self.server_major.get_or_init(|| major))
    }

    // ---------------------------------------------------------------------
    // Result shaping shared by the repository and transaction surfaces
    // ---------------------------------------------------------------------

    pub(crate) async fn query_table(
        &self,
        scope: Scope<'_>,
        operation: &'static str,
        query: &Query,
    ) -> DbResult<ResultSet> {
        match self.dispatch(scope, operation, Command::Query(query)).await? {
            Output::Set(set) => Ok(set),
            _ => Err(unexpected_output(operation)),
        }
    }

    pub(crate) async fn query(&self, scope: Scope<'_>, query: &Query) -> DbResult<Vec<Row>> {
        Ok(self.query_table(scope, "query", query).await?.rows)
    }

    pub(crate) async fn query_one(&self, scope: Scope<'_>, query: &Query) -> DbResult<Option<Row>> {
        let set = self.query_table(scope, "query_one", query).await?;
        Ok(set.rows.into_iter().next())
    }

    /// First column of the first row; `None` for no rows or SQL NULL.
    pub(crate) async fn execute_scalar(
        &self,
        scope: Scope<'_>,
        query: &Query,
    ) -> DbResult<Option<JsonValue>> {
        let set = self.query_table(scope, "execute_scalar", query).await?;
        Ok(set.first_value().filter(|v| !v.is_null()).cloned())
    }

    pub(crate) async fn execute(
        &self,
        scope: Scope<'_>,
        query: &Query,
        kind: CommandKind,
    ) -> DbResult<u64> {
        match self
            .dispatch(scope, "execute", Command::Execute(query, kind))
            .await?
        {
            Output::Affected(n) => Ok(n),
            _ => Err(unexpected_output("execute")),
        }
    }

    pub(crate) async fn query_multiple(
        &self,
        scope: Scope<'_>,
        query: &Query,
    ) -> DbResult<Vec<Vec<Row>>> {
        match self
            .dispatch(scope, "query_multiple", Command::Multiple(query))
            .await?
        {
            Output::Sets(sets) => Ok(sets.into_iter().map(|s| s.rows).collect()),
            _ => Err(unexpected_output("query_multiple")),
        }
    }

    pub(crate) async fn page_table(
        &self,
        scope: Scope<'_>,
        request: &PageRequest,
    ) -> DbResult<PagedTable> {
        match self.dispatch(scope, "page", Command::Page(request)).await? {
            Output::Page { sets, strategy } => assemble_page(sets, strategy),
            _ => Err(unexpected_output("page")),
        }
    }

    pub(crate) async fn page(
        &self,
        scope: Scope<'_>,
        request: &PageRequest,
    ) -> DbResult<PageResult<Row>> {
        let paged = self.page_table(scope, request).await?;
        Ok(PageResult {
            rows: paged.table.rows,
            total: paged.total,
        })
    }
}

/// Append the body that turns a `WITH T AS (...)` prologue into a statement.
fn complete_cte(query: &Query) -> String {
    if query.uses_cte {
        format!(
            "{} SELECT * FROM T",
            query.sql.trim().trim_end_matches(';').trim_end()
        )
    } else {
        query.sql.clone()
    }
}

/// Split a `count;page;` batch result into total and rows.
fn assemble_page(sets: Vec<ResultSet>, strategy: PageStrategy) -> DbResult<PagedTable> {
    let mut sets = sets.into_iter();
    let (Some(count), Some(mut table)) = (sets.next(), sets.next()) else {
        return Err(DbError::internal(
            "Paging batch must return a count result set and a page result set",
        ));
    };

    let total = count.first_value().map(read_total).transpose()?.unwrap_or(0);
    if strategy == PageStrategy::RowNumber {
        table.remove_column(ROW_NUMBER_COLUMN);
    }
    Ok(PagedTable { table, total })
}

/// Count columns come back as integers, decimals rendered as strings or floats
/// depending on the engine.
fn read_total(value: &JsonValue) -> DbResult<i64> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| DbError::internal(format!("Page total out of range: {}", n))),
        JsonValue::String(s) => s
            .trim()
            .parse::<i64>()
            .or_else(|_| s.trim().parse::<f64>().map(|f| f as i64))
            .map_err(|_| DbError::internal(format!("Page total is not a number: '{}'", s))),
        JsonValue::Null => Ok(0),
        other => Err(DbError::internal(format!(
            "Page total has unexpected type: {}",
            other
        ))),
    }
}

fn unexpected_output(operation: &str) -> DbError {
    DbError::internal(format!("Driver returned an unexpected result shape for {}", operation))
}
