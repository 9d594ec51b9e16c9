//! Dialect-aware paging SQL.
//!
//! A page request becomes one text blob holding two statements: the count
//! statement (total rows of the unpaged result) followed by the page
//! statement. Both are terminated by `;` so a driver can run them as one
//! batch and read the count from the first result set.

use crate::error::DbError;
use crate::models::{DatabaseType, PageRequest};
use std::str::FromStr;

/// First SQL Server major version with `OFFSET .. FETCH NEXT` support.
pub const DEFAULT_OFFSET_FETCH_SINCE: u32 = 11;

/// Paging capability of the SQL Server family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlServerPaging {
    /// Servers at or above this major version get `OFFSET/FETCH`; older ones
    /// get the `ROW_NUMBER()` window.
    pub offset_fetch_since: u32,
}

impl Default for SqlServerPaging {
    fn default() -> Self {
        Self {
            offset_fetch_since: DEFAULT_OFFSET_FETCH_SINCE,
        }
    }
}

/// SQL dialect the core synthesizes paging statements for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    PostgreSql,
    Sqlite,
    SqlServer(SqlServerPaging),
}

/// How the page statement restricts rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStrategy {
    LimitOffset,
    OffsetFetch,
    /// Windowed fallback; the result carries a synthetic `ROWNUMBER` column.
    RowNumber,
}

/// Output of [`Dialect::build_page_sql`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSql {
    pub sql: String,
    pub strategy: PageStrategy,
}

impl Dialect {
    pub fn sql_server() -> Self {
        Self::SqlServer(SqlServerPaging::default())
    }

    /// Dialect matching an engine.
    pub fn from_database_type(db_type: DatabaseType) -> Self {
        match db_type {
            DatabaseType::MySQL => Self::MySql,
            DatabaseType::PostgreSQL => Self::PostgreSql,
            DatabaseType::SQLite => Self::Sqlite,
            DatabaseType::SqlServer => Self::sql_server(),
        }
    }

    /// Guess the dialect from a connection string's scheme.
    pub fn infer(connection_string: &str) -> Option<Self> {
        DatabaseType::from_connection_string(connection_string).map(Self::from_database_type)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::PostgreSql => "postgresql",
            Self::Sqlite => "sqlite",
            Self::SqlServer(_) => "sqlserver",
        }
    }

    /// True when paging SQL depends on the server's major version.
    pub fn needs_server_version(&self) -> bool {
        matches!(self, Self::SqlServer(_))
    }

    /// Build the `count;page;` pair for `request`.
    ///
    /// `server_major` only matters for SQL Server; `None` is treated as a
    /// modern server.
    pub fn build_page_sql(
        &self,
        request: &PageRequest,
        count_syntax: &str,
        server_major: Option<u32>,
    ) -> PageSql {
        let sql = normalize(&request.sql);
        let order = order_clause(&request.order_field, request.ascending);
        let size = request.page_size;
        let offset = request.offset();

        match self {
            Self::MySql | Self::PostgreSql | Self::Sqlite => {
                let order_by = order.map(|o| format!(" ORDER BY {o}")).unwrap_or_default();
                let text = if request.uses_cte {
                    format!(
                        "{sql} SELECT {count_syntax} AS TOTAL FROM T;\
                         {sql} SELECT * FROM T{order_by} LIMIT {size} OFFSET {offset};"
                    )
                } else {
                    format!(
                        "SELECT {count_syntax} AS TOTAL FROM ({sql}) AS T;\
                         {sql}{order_by} LIMIT {size} OFFSET {offset};"
                    )
                };
                PageSql {
                    sql: text,
                    strategy: PageStrategy::LimitOffset,
                }
            }
            Self::SqlServer(paging) => {
                // ORDER BY is mandatory for OFFSET/FETCH and window functions.
                let order = order.unwrap_or_else(|| "(SELECT 0)".to_string());
                let count = if request.uses_cte {
                    format!("{sql} SELECT {count_syntax} AS [TOTAL] FROM T;")
                } else {
                    format!("SELECT {count_syntax} AS [TOTAL] FROM ({sql}) AS T;")
                };

                let modern = server_major.is_none_or(|major| major >= paging.offset_fetch_since);
                if modern {
                    let page = if request.uses_cte {
                        format!(
                            "{sql} SELECT * FROM T ORDER BY {order} \
                             OFFSET {offset} ROWS FETCH NEXT {size} ROWS ONLY;"
                        )
                    } else {
                        format!(
                            "{sql} ORDER BY {order} OFFSET {offset} ROWS FETCH NEXT {size} ROWS ONLY;"
                        )
                    };
                    PageSql {
                        sql: count + &page,
                        strategy: PageStrategy::OffsetFetch,
                    }
                } else {
                    let (start, end) = (request.row_start(), request.row_end());
                    let page = if request.uses_cte {
                        format!(
                            "{sql}, R AS (SELECT ROW_NUMBER() OVER (ORDER BY {order}) AS [ROWNUMBER], T.* FROM T) \
                             SELECT * FROM R WHERE [ROWNUMBER] BETWEEN {start} AND {end};"
                        )
                    } else {
                        format!(
                            "SELECT * FROM (SELECT ROW_NUMBER() OVER (ORDER BY {order}) AS [ROWNUMBER], T.* \
                             FROM ({sql}) AS T) AS N WHERE [ROWNUMBER] BETWEEN {start} AND {end};"
                        )
                    };
                    PageSql {
                        sql: count + &page,
                        strategy: PageStrategy::RowNumber,
                    }
                }
            }
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Self::PostgreSql),
            "sqlite" => Ok(Self::Sqlite),
            "sqlserver" | "mssql" => Ok(Self::sql_server()),
            other => Err(format!(
                "Unknown dialect '{other}'. Expected one of: mysql, postgresql, sqlite, sqlserver"
            )),
        }
    }
}

impl TryFrom<&str> for Dialect {
    type Error = DbError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse().map_err(DbError::invalid_input)
    }
}

/// Strip trailing whitespace and terminators so the text can be embedded.
fn normalize(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

/// `ORDER BY` body for a field, or `None` when no field was given.
fn order_clause(field: &str, ascending: bool) -> Option<String> {
    let field = field.trim();
    if field.is_empty() {
        return None;
    }
    if has_explicit_direction(field) {
        return Some(field.to_string());
    }
    let direction = if ascending { "ASC" } else { "DESC" };
    Some(format!("{field} {direction}"))
}

/// An `ASC`/`DESC` keyword or a block comment already settles the direction.
fn has_explicit_direction(field: &str) -> bool {
    field.contains("/*")
        || field
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .any(|tok| tok.eq_ignore_ascii_case("asc") || tok.eq_ignore_ascii_case("desc"))
}
