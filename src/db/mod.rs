//! Database layer.
//!
//! This module provides the execution core and its collaborators:
//! - Replica selection (load balancers)
//! - Connection routing and acquisition
//! - Dialect-aware paging SQL
//! - Statement execution with diagnostics
//! - Transaction lifecycle
//! - The bundled sqlx driver (pools, parameter binding, row decoding)

pub mod balancer;
pub mod driver;
pub(crate) mod executor;
mod macros;
pub mod paging;
pub(crate) mod params;
pub mod pool;
pub mod provider;
pub mod transaction;
pub mod types;

pub use balancer::{BalancerKind, LoadBalancer, WeightedRandom, WeightedRoundRobin};
pub use driver::{BoxConnection, Connection, Driver, parse_major_version};
pub use paging::{Dialect, PageSql, PageStrategy, SqlServerPaging};
pub use pool::{DbPool, SqlxConnection, SqlxDriver};
pub use provider::ConnectionProvider;
pub use transaction::Transaction;
