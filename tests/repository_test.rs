//! Repository operations outside transactions, against the scripted driver.

mod common;

use common::{MockDriver, page_batch, result_set};
use serde::Deserialize;
use serde_json::json;
use sqlbridge::config::RepositoryConfig;
use sqlbridge::db::{WeightedRandom, WeightedRoundRobin};
use sqlbridge::models::{PageRequest, Params, Query};
use sqlbridge::{DbError, Repository};
use std::sync::Arc;

fn repository(config: RepositoryConfig) -> (Repository, Arc<common::MockState>) {
    let (driver, state) = MockDriver::new();
    (Repository::new(config, driver).unwrap(), state)
}

fn primary() -> RepositoryConfig {
    RepositoryConfig::new("mysql://app@primary/shop")
}

fn connects(state: &common::MockState) -> Vec<String> {
    state
        .calls()
        .into_iter()
        .filter_map(|c| c.strip_prefix("connect:").map(str::to_string))
        .collect()
}

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    id: i64,
    name: String,
}

#[tokio::test]
async fn test_each_operation_uses_and_closes_its_own_connection() {
    let (repo, state) = repository(primary());
    repo.query("SELECT 1").await.unwrap();
    repo.execute("UPDATE t SET x = 1").await.unwrap();
    repo.execute_scalar("SELECT 1").await.unwrap();
    assert_eq!(connects(&state).len(), 3);
    assert_eq!(state.closes(), 3);
}

#[tokio::test]
async fn test_failed_operation_still_closes_connection() {
    let (repo, state) = repository(primary());
    state.fail_on("broken");
    assert!(repo.query("SELECT broken").await.is_err());
    assert!(repo.execute("DELETE broken").await.is_err());
    assert_eq!(state.closes(), 2);
}

#[tokio::test]
async fn test_master_flag_ignores_replicas() {
    let config = primary()
        .with_replica("mysql://app@r1/shop", 5)
        .with_load_balancer(Arc::new(WeightedRoundRobin::new()));
    let (repo, state) = repository(config);
    repo.query("SELECT 1").await.unwrap();
    repo.query("SELECT 1").await.unwrap();
    assert_eq!(
        connects(&state),
        vec!["mysql://app@primary/shop", "mysql://app@primary/shop"]
    );
}

#[tokio::test]
async fn test_replica_reads_follow_round_robin_weights() {
    let config = primary()
        .with_replica("mysql://app@r1/shop", 2)
        .with_replica("mysql://app@r2/shop", 1)
        .read_from_replicas()
        .with_load_balancer(Arc::new(WeightedRoundRobin::new()));
    let (repo, state) = repository(config);
    for _ in 0..6 {
        repo.query("SELECT 1").await.unwrap();
    }
    let targets = connects(&state);
    let r1 = targets.iter().filter(|t| t.contains("@r1")).count();
    let r2 = targets.iter().filter(|t| t.contains("@r2")).count();
    assert_eq!((r1, r2), (4, 2));
    assert!(!targets.iter().any(|t| t.contains("primary")));
}

#[tokio::test]
async fn test_random_balancer_only_picks_replicas() {
    let config = primary()
        .with_replica("mysql://app@r1/shop", 1)
        .with_replica("mysql://app@r2/shop", 3)
        .read_from_replicas()
        .with_load_balancer(Arc::new(WeightedRandom));
    let (repo, state) = repository(config);
    for _ in 0..20 {
        repo.query("SELECT 1").await.unwrap();
    }
    assert!(connects(&state).iter().all(|t| t.contains("@r1") || t.contains("@r2")));
}

#[tokio::test]
async fn test_query_shapes() {
    let (repo, state) = repository(primary());
    let users = result_set(
        &["id", "name"],
        vec![vec![json!(1), json!("ada")], vec![json!(2), json!("grace")]],
    );
    for _ in 0..4 {
        state.respond(vec![users.clone()]);
    }

    let rows = repo.query("SELECT id, name FROM users").await.unwrap();
    assert_eq!(rows.len(), 2);

    let first = repo.query_one("SELECT id, name FROM users").await.unwrap();
    assert_eq!(first.unwrap()["name"], json!("ada"));

    let typed: Vec<User> = repo.query_as("SELECT id, name FROM users").await.unwrap();
    assert_eq!(
        typed[1],
        User {
            id: 2,
            name: "grace".to_string()
        }
    );

    let table = repo.query_table("SELECT id, name FROM users").await.unwrap();
    assert_eq!(table.column_names(), vec!["id", "name"]);
}

#[tokio::test]
async fn test_query_one_on_empty_result() {
    let (repo, _state) = repository(primary());
    assert!(repo.query_one("SELECT 1 WHERE 1 = 0").await.unwrap().is_none());
    let user: Option<User> = repo.query_one_as("SELECT 1 WHERE 1 = 0").await.unwrap();
    assert!(user.is_none());
}

#[tokio::test]
async fn test_scalar_maps_null_and_empty_to_none() {
    let (repo, state) = repository(primary());
    state.respond(vec![result_set(&["n"], vec![vec![json!(42)]])]);
    state.respond(vec![result_set(&["n"], vec![vec![json!(null)]])]);

    assert_eq!(repo.execute_scalar("SELECT 42").await.unwrap(), Some(json!(42)));
    assert_eq!(repo.execute_scalar("SELECT NULL").await.unwrap(), None);
    assert_eq!(repo.execute_scalar("SELECT 1 WHERE 0").await.unwrap(), None);
}

#[tokio::test]
async fn test_execute_returns_affected_rows() {
    let (repo, state) = repository(primary());
    *state.affected.lock().unwrap() = 3;
    assert_eq!(repo.execute("DELETE FROM carts").await.unwrap(), 3);
}

#[tokio::test]
async fn test_cte_query_gets_select_body() {
    let (repo, state) = repository(primary());
    let query = Query::new("WITH T AS (SELECT id FROM users WHERE active = ?);")
        .with_params(Params::new().bind(true))
        .with_cte();
    repo.query(query).await.unwrap();
    assert_eq!(
        state.last_statement(),
        "WITH T AS (SELECT id FROM users WHERE active = ?) SELECT * FROM T"
    );
}

#[tokio::test]
async fn test_query_multiple_returns_every_set() {
    let (repo, state) = repository(primary());
    state.respond(vec![
        result_set(&["a"], vec![vec![json!(1)]]),
        result_set(&["b"], vec![vec![json!(2)], vec![json!(3)]]),
    ]);
    let sets = repo
        .query_multiple("SELECT 1 AS a; SELECT 2 AS b UNION SELECT 3")
        .await
        .unwrap();
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[1].len(), 2);
}

#[tokio::test]
async fn test_sql_intercept_rewrites_dispatched_text() {
    let config = primary().with_sql_intercept(|sql: &str, params: &Params| {
        format!("/* params={} */ {}", params.len(), sql)
    });
    let (repo, state) = repository(config);
    repo.execute(("DELETE FROM t WHERE id = @id", Params::new().named("id", 9)))
        .await
        .unwrap();
    assert_eq!(
        state.last_statement(),
        "/* params=1 */ DELETE FROM t WHERE id = @id"
    );
}

#[tokio::test]
async fn test_mysql_page_with_cte() {
    let (repo, state) = repository(primary());
    state.respond(page_batch(37, &["id"], vec![vec![json!(31)], vec![json!(32)]]));

    let request = PageRequest::new("WITH T AS (SELECT id FROM items)", 10, 4)
        .order_by("id", true)
        .with_cte();
    let page = repo.page(&request).await.unwrap();

    assert_eq!(page.total, 37);
    assert_eq!(page.rows.len(), 2);
    assert_eq!(
        state.last_statement(),
        "WITH T AS (SELECT id FROM items) SELECT COUNT(*) AS TOTAL FROM T;\
         WITH T AS (SELECT id FROM items) SELECT * FROM T ORDER BY id ASC LIMIT 10 OFFSET 30;"
    );
}

#[tokio::test]
async fn test_page_as_decodes_rows() {
    let (repo, state) = repository(primary());
    state.respond(page_batch(
        1,
        &["id", "name"],
        vec![vec![json!(7), json!("linus")]],
    ));
    let page = repo
        .page_as::<User>(&PageRequest::new("SELECT id, name FROM users", 5, 1))
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.rows[0].name, "linus");
}

#[tokio::test]
async fn test_invalid_page_request_never_reaches_driver() {
    let (repo, state) = repository(primary());
    let err = repo
        .page(&PageRequest::new("SELECT 1", 0, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));
    assert!(state.statements().is_empty());
    assert_eq!(state.closes(), 1);
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let (driver, _state) = MockDriver::new();
    let config = primary().with_replica("mysql://app@r1/shop", 0);
    assert!(Repository::new(config, driver).is_err());

    let (driver, _state) = MockDriver::new();
    assert!(Repository::new(RepositoryConfig::new("  "), driver).is_err());
}
