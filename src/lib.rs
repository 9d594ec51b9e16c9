//! sqlbridge
//!
//! A data-access execution core: routes statements to a primary or weighted
//! read replicas, synthesizes dialect-specific paging SQL, manages
//! transactions and publishes execution diagnostics. Blocking and async
//! surfaces share one execution path.

pub mod blocking;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod models;
pub mod repository;

pub use blocking::{BlockingRepository, BlockingTransaction};
pub use config::{Config, PoolOptions, ReplicaConfig, RepositoryConfig};
pub use db::{Dialect, Transaction};
pub use error::{DbError, DbResult};
pub use models::{PageRequest, PageResult, Params, Query, QueryParam, ResultSet, Row};
pub use repository::Repository;
