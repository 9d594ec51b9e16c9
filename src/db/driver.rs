//! Boundary to the database transport.
//!
//! The core never talks to a wire protocol directly. A [`Driver`] turns a
//! connection string into a [`Connection`], and a connection runs raw SQL and
//! materializes rows as [`ResultSet`]s. The bundled implementation lives in
//! [`crate::db::pool`]; engines it does not cover (SQL Server) plug in here.

use crate::error::DbResult;
use crate::models::{CommandKind, Params, ResultSet};
use async_trait::async_trait;
use std::time::Duration;

/// Opens connections to one database engine family.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Create a connection handle for `connection_string`.
    ///
    /// The handle may still be closed; the provider calls
    /// [`Connection::open`] before handing it to the core.
    async fn connect(&self, connection_string: &str) -> DbResult<BoxConnection>;
}

/// A single physical connection, exclusively owned by one operation or one
/// transaction at a time.
#[async_trait]
pub trait Connection: Send {
    /// Masked connection target, safe for logs and diagnostics.
    fn data_source(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Open the connection. Calling it on an open connection is a no-op.
    async fn open(&mut self) -> DbResult<()>;

    /// Run `sql` and return its first result set.
    async fn query(&mut self, sql: &str, params: &Params, timeout: Duration)
    -> DbResult<ResultSet>;

    /// Run a batch and return every result set it produced, in order.
    async fn query_multiple(
        &mut self,
        sql: &str,
        params: &Params,
        timeout: Duration,
    ) -> DbResult<Vec<ResultSet>>;

    /// Run a statement and return the number of affected rows.
    async fn execute(
        &mut self,
        sql: &str,
        params: &Params,
        kind: CommandKind,
        timeout: Duration,
    ) -> DbResult<u64>;

    /// Raw server version string, if the engine reports one.
    async fn server_version(&mut self) -> DbResult<Option<String>>;

    async fn begin(&mut self) -> DbResult<()>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    /// Release the connection. Calling it twice is a no-op.
    async fn close(&mut self) -> DbResult<()>;
}

pub type BoxConnection = Box<dyn Connection>;

/// Extract the leading major number from a version banner such as
/// `"Microsoft SQL Server 2019 (RTM) - 15.0.2000.5"` or `"10.50.1600.1"`.
///
/// Prefers a dotted `major.minor` token; falls back to the first integer.
pub fn parse_major_version(version: &str) -> Option<u32> {
    let dotted = version.split(|c: char| c.is_whitespace() || c == '(' || c == ')').find_map(|tok| {
        let (major, rest) = tok.split_once('.')?;
        if rest.starts_with(|c: char| c.is_ascii_digit()) {
            major.parse::<u32>().ok()
        } else {
            None
        }
    });
    dotted.or_else(|| {
        version
            .split(|c: char| !c.is_ascii_digit())
            .find(|s| !s.is_empty())
            .and_then(|s| s.parse().ok())
    })
}
