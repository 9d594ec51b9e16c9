//! sqlbridge - command-line entry point.
//!
//! Runs one statement through the repository against the configured primary
//! or replicas and prints the outcome as JSON.

use sqlbridge::config::{Command, Config, params_from_args};
use sqlbridge::diagnostics::{self, TracingObserver};
use sqlbridge::models::{CommandKind, PageRequest, Query};
use sqlbridge::{DbResult, Repository};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .init();
    }
}

async fn run(repository: &Repository, command: Command) -> DbResult<JsonValue> {
    let value = match command {
        Command::Query {
            sql,
            params,
            one,
            multiple,
        } => {
            let query = Query::new(sql).with_params(params_from_args(&params));
            if one {
                json!(repository.query_one(query).await?)
            } else if multiple {
                json!(repository.query_multiple(query).await?)
            } else {
                json!(repository.query(query).await?)
            }
        }
        Command::Execute {
            sql,
            params,
            procedure,
        } => {
            let kind = if procedure {
                CommandKind::StoredProcedure
            } else {
                CommandKind::Text
            };
            let query = Query::new(sql).with_params(params_from_args(&params));
            json!({ "rows_affected": repository.execute_command(query, kind).await? })
        }
        Command::Scalar { sql, params } => {
            let query = Query::new(sql).with_params(params_from_args(&params));
            repository
                .execute_scalar(query)
                .await?
                .unwrap_or(JsonValue::Null)
        }
        Command::Page {
            sql,
            params,
            page,
            size,
            order_by,
            desc,
            cte,
        } => {
            let mut request =
                PageRequest::new(sql, size, page).with_params(params_from_args(&params));
            if let Some(field) = order_by {
                request = request.order_by(field, !desc);
            }
            if cte {
                request = request.with_cte();
            }
            let page = repository.page(&request).await?;
            json!({ "rows": page.rows, "total": page.total })
        }
    };
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();

    init_tracing(&config);

    info!(
        replicas = config.replicas.len(),
        read_replicas = config.read_replicas,
        "Starting sqlbridge v{}",
        env!("CARGO_PKG_VERSION")
    );

    let repository = Repository::with_sqlx(config.repository_config()?, config.pool_options())?;

    let _trace = config
        .trace_sql
        .then(|| diagnostics::channel().subscribe(Arc::new(TracingObserver)));

    match run(&repository, config.command.clone()).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            Err(e.into())
        }
    }
}
