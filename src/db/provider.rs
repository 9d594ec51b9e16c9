//! Connection routing.
//!
//! Chooses the endpoint for an operation (primary or a weighted replica) and
//! hands back an open connection. Failures are surfaced as-is; nothing here
//! retries.

use crate::config::RepositoryConfig;
use crate::db::driver::{BoxConnection, Driver};
use crate::error::DbResult;
use crate::models::mask_connection_string;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct ConnectionProvider {
    driver: Arc<dyn Driver>,
}

impl ConnectionProvider {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver }
    }

    /// Connection string that should answer the next operation.
    pub fn route<'a>(&self, config: &'a RepositoryConfig) -> std::borrow::Cow<'a, str> {
        let primary = config.master_connection_string.as_str();
        let balancer = match &config.load_balancer {
            Some(balancer) if !config.is_master && !config.replicas.is_empty() => balancer,
            _ => return primary.into(),
        };

        let candidates = config.replica_connection_strings();
        let weights = config.replica_weights();
        balancer
            .select(primary, &candidates, &weights)
            .to_string()
            .into()
    }

    /// Connect to the routed endpoint and make sure the connection is open.
    pub async fn acquire(&self, config: &RepositoryConfig) -> DbResult<BoxConnection> {
        let target = self.route(config);
        debug!(
            target_endpoint = %mask_connection_string(&target),
            is_master = config.is_master,
            replicas = config.replicas.len(),
            "Acquiring connection"
        );
        self.open(&target).await
    }

    /// Connect to the primary regardless of `is_master`. Transactions use
    /// this so their writes never land on a replica.
    pub async fn acquire_primary(&self, config: &RepositoryConfig) -> DbResult<BoxConnection> {
        let target = config.master_connection_string.as_str();
        debug!(
            target_endpoint = %mask_connection_string(target),
            "Acquiring primary connection"
        );
        self.open(target).await
    }

    async fn open(&self, target: &str) -> DbResult<BoxConnection> {
        let mut conn = self.driver.connect(target).await?;
        if !conn.is_open() {
            conn.open().await?;
        }
        Ok(conn)
    }
}

impl std::fmt::Debug for ConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProvider").finish_non_exhaustive()
    }
}
