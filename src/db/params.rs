//! Statement preparation for the bundled sqlx driver.
//!
//! - splits a batch into statements at top-level `;`
//! - rewrites `@name` / `:name` references into driver placeholders
//! - picks, per statement, the parameter values its placeholders consume
//! - binds `QueryParam` values onto database-specific sqlx queries
//!
//! String literals, quoted identifiers and comments are never inspected for
//! separators or placeholders.

use crate::models::{DatabaseType, Params, QueryParam};
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};
use std::collections::BTreeMap;

/// Placeholder syntax understood by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaceholderStyle {
    /// `?` (MySQL, SQLite)
    Question,
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
}

impl PlaceholderStyle {
    fn of(db: DatabaseType) -> Self {
        match db {
            DatabaseType::PostgreSQL => PlaceholderStyle::Dollar,
            _ => PlaceholderStyle::Question,
        }
    }
}

/// One statement with the values it binds, in placeholder order.
#[derive(Debug, PartialEq)]
pub(crate) struct BoundStatement<'p> {
    pub sql: String,
    pub args: Vec<&'p QueryParam>,
}

/// A character of SQL text and whether it is code (outside literals,
/// quoted identifiers and comments).
#[derive(Clone, Copy)]
struct Lexeme {
    pos: usize,
    ch: char,
    code: bool,
}

#[derive(Clone, PartialEq)]
enum LexState {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
    /// PostgreSQL `$tag$ ... $tag$` body, holding its delimiter.
    DollarQuoted(Vec<char>),
}

/// `$tag$` opening a dollar-quoted string at the start of `rest`.
/// `$1` style placeholders have a numeric tag and never qualify.
fn dollar_delimiter(rest: &[(usize, char)]) -> Option<Vec<char>> {
    let tag: Vec<char> = rest
        .iter()
        .skip(1)
        .map(|&(_, c)| c)
        .take_while(|&c| is_name_char(c))
        .collect();
    if tag.first().is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    if rest.get(tag.len() + 1).map(|&(_, c)| c) != Some('$') {
        return None;
    }
    let mut delimiter = Vec::with_capacity(tag.len() + 2);
    delimiter.push('$');
    delimiter.extend(tag);
    delimiter.push('$');
    Some(delimiter)
}

fn starts_with(rest: &[(usize, char)], delimiter: &[char]) -> bool {
    rest.len() >= delimiter.len()
        && rest.iter().zip(delimiter).all(|(&(_, c), &d)| c == d)
}

/// Classify each character of `sql` using the quoting and comment rules of `db`.
///
/// MySQL adds backslash escapes inside string literals and `#` line
/// comments; PostgreSQL adds dollar-quoted strings.
fn lex(sql: &str, db: DatabaseType) -> Vec<Lexeme> {
    let chars: Vec<(usize, char)> = sql.char_indices().collect();
    let mut out = Vec::with_capacity(chars.len());
    let mut state = LexState::Code;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i].1;
        let next = chars.get(i + 1).map(|&(_, c)| c);
        let prev = i.checked_sub(1).map(|p| chars[p].1);

        // (characters consumed, whether they are code, state afterwards)
        let (taken, code, after) = match &state {
            LexState::Code => match (ch, next) {
                ('\'' | '"' | '`', _) => (1, false, Some(LexState::Quoted(ch))),
                ('-', Some('-')) => (2, false, Some(LexState::LineComment)),
                ('/', Some('*')) => (2, false, Some(LexState::BlockComment)),
                ('#', _) if db == DatabaseType::MySQL => (1, false, Some(LexState::LineComment)),
                ('$', _)
                    if db == DatabaseType::PostgreSQL
                        && !prev.is_some_and(|c| is_name_char(c) || c == '$') =>
                {
                    match dollar_delimiter(&chars[i..]) {
                        Some(delimiter) => (
                            delimiter.len(),
                            false,
                            Some(LexState::DollarQuoted(delimiter)),
                        ),
                        None => (1, true, None),
                    }
                }
                _ => (1, true, None),
            },
            LexState::Quoted(quote) => {
                let quote = *quote;
                if ch == '\\' && quote != '`' && db == DatabaseType::MySQL && next.is_some() {
                    (2, false, None)
                } else if ch == quote && next == Some(quote) {
                    // doubled quote is an escaped quote
                    (2, false, None)
                } else if ch == quote {
                    (1, false, Some(LexState::Code))
                } else {
                    (1, false, None)
                }
            }
            LexState::LineComment if ch == '\n' => (1, false, Some(LexState::Code)),
            LexState::LineComment => (1, false, None),
            LexState::BlockComment if ch == '*' && next == Some('/') => {
                (2, false, Some(LexState::Code))
            }
            LexState::BlockComment => (1, false, None),
            LexState::DollarQuoted(delimiter) if starts_with(&chars[i..], delimiter) => {
                (delimiter.len(), false, Some(LexState::Code))
            }
            LexState::DollarQuoted(_) => (1, false, None),
        };

        out.extend(
            chars[i..i + taken]
                .iter()
                .map(|&(pos, ch)| Lexeme { pos, ch, code }),
        );
        if let Some(after) = after {
            state = after;
        }
        i += taken;
    }
    out
}

/// Split a batch into its statements. Empty statements are dropped.
pub(crate) fn split_statements(sql: &str, db: DatabaseType) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut start = 0;
    for lexeme in lex(sql, db) {
        if lexeme.code && lexeme.ch == ';' {
            statements.push(&sql[start..lexeme.pos]);
            start = lexeme.pos + 1;
        }
    }
    statements.push(&sql[start..]);
    statements
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Rewrite one statement into `db`'s placeholder syntax and collect its arguments.
///
/// Positional values are consumed by the statement's own placeholders only,
/// so a batch that repeats the same SQL binds the same values each time.
/// Named references that have no value in `params` are left untouched
/// (`@session_var`, `:=` and `::type` are not parameters).
pub(crate) fn bind_statement<'p>(
    statement: &str,
    params: &'p Params,
    db: DatabaseType,
) -> BoundStatement<'p> {
    let style = PlaceholderStyle::of(db);
    let lexemes = lex(statement, db);
    let mut sql = String::with_capacity(statement.len() + 8);
    let mut args: Vec<&'p QueryParam> = Vec::new();
    let mut positional = params.positional.iter();

    // `$n` numbering: named references continue after the highest positional index.
    let mut dollar_next = match style {
        PlaceholderStyle::Dollar => max_dollar_index(&lexemes) + 1,
        PlaceholderStyle::Question => 0,
    };
    let mut dollar_named: BTreeMap<String, usize> = BTreeMap::new();
    if style == PlaceholderStyle::Dollar {
        let used = dollar_next - 1;
        args.extend(params.positional.iter().take(used));
    }

    let mut i = 0;
    while i < lexemes.len() {
        let Lexeme { ch, code, .. } = lexemes[i];
        if !code {
            sql.push(ch);
            i += 1;
            continue;
        }

        if ch == '?' && style == PlaceholderStyle::Question {
            if let Some(value) = positional.next() {
                args.push(value);
            }
            sql.push(ch);
            i += 1;
            continue;
        }

        if (ch == '@' || ch == ':') && !params.named.is_empty() {
            let prev = i.checked_sub(1).map(|p| lexemes[p].ch);
            let name: String = lexemes[i + 1..]
                .iter()
                .take_while(|l| l.code && is_name_char(l.ch))
                .map(|l| l.ch)
                .collect();
            let starts_like_name = name.chars().next().is_some_and(|c| !c.is_ascii_digit());
            let value = params.get(&name).filter(|_| starts_like_name && prev != Some(ch));

            if let Some(value) = value {
                match style {
                    PlaceholderStyle::Question => {
                        sql.push('?');
                        args.push(value);
                    }
                    PlaceholderStyle::Dollar => {
                        let index = *dollar_named.entry(name.clone()).or_insert_with(|| {
                            args.push(value);
                            let index = dollar_next;
                            dollar_next += 1;
                            index
                        });
                        sql.push('$');
                        sql.push_str(&index.to_string());
                    }
                }
                i += 1 + name.chars().count();
                continue;
            }
        }

        sql.push(ch);
        i += 1;
    }

    BoundStatement { sql, args }
}

/// Highest `$n` placeholder in code, or 0.
fn max_dollar_index(lexemes: &[Lexeme]) -> usize {
    let mut max = 0;
    let mut i = 0;
    while i < lexemes.len() {
        if lexemes[i].code && lexemes[i].ch == '$' {
            let digits: String = lexemes[i + 1..]
                .iter()
                .take_while(|l| l.code && l.ch.is_ascii_digit())
                .map(|l| l.ch)
                .collect();
            if let Ok(n) = digits.parse::<usize>() {
                max = max.max(n);
            }
            i += 1 + digits.len();
            continue;
        }
        i += 1;
    }
    max
}

/// `CALL name(...)` for a stored procedure invocation.
///
/// Positional values become placeholders in order; named values follow as
/// `name => $n` on PostgreSQL. Returns `None` when named values are given
/// for a backend without named procedure arguments.
pub(crate) fn procedure_call<'p>(
    name: &str,
    params: &'p Params,
    db: DatabaseType,
) -> Option<BoundStatement<'p>> {
    let style = PlaceholderStyle::of(db);
    if style == PlaceholderStyle::Question && !params.named.is_empty() {
        return None;
    }

    let mut args: Vec<&'p QueryParam> = Vec::with_capacity(params.len());
    let mut slots = Vec::with_capacity(params.len());
    for value in &params.positional {
        args.push(value);
        slots.push(match style {
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::Dollar => format!("${}", args.len()),
        });
    }
    for (arg_name, value) in &params.named {
        args.push(value);
        slots.push(format!("{} => ${}", arg_name, args.len()));
    }

    Some(BoundStatement {
        sql: format!("CALL {}({})", name.trim(), slots.join(", ")),
        args,
    })
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        // SQLite doesn't have native JSON type, store as string
        QueryParam::Json(v) => query.bind(v.to_string()),
    }
}
