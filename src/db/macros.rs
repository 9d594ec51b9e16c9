//! Backend dispatch macro for the bundled driver.
//!
//! The sqlx pool and connection wrappers are enums with one variant per
//! backend. The macro expands a match over such an enum so that each arm can
//! use backend-specific types while the call site stays linear.

/// Generate match arms over a backend enum declared in `crate::db::pool`.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, DbPool, {
///     MySql(p) => p.close().await,
///     Postgres(p) => p.close().await,
///     SQLite(p) => p.close().await,
/// });
/// ```
macro_rules! impl_db_dispatch {
    ($target:expr, $kind:ident, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $target {
            $(
                $crate::db::pool::$kind::$variant($p) => $body,
            )+
        }
    };
}

pub(crate) use impl_db_dispatch;
