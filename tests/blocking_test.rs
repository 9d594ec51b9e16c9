//! Blocking surface on SQLite.

use serde_json::json;
use sqlbridge::config::{PoolOptions, RepositoryConfig};
use sqlbridge::models::{PageRequest, Params, TransactionState};
use sqlbridge::{BlockingRepository, DbError};

fn repository(dir: &tempfile::TempDir) -> BlockingRepository {
    let url = format!("sqlite:{}", dir.path().join("blocking.db").display());
    let repo =
        BlockingRepository::with_sqlx(RepositoryConfig::new(url), PoolOptions::default()).unwrap();
    repo.execute("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)")
        .unwrap();
    repo
}

fn count(repo: &BlockingRepository) -> Option<serde_json::Value> {
    repo.execute_scalar("SELECT COUNT(*) FROM notes").unwrap()
}

#[test]
fn test_blocking_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let repo = repository(&dir);

    let inserted = repo
        .execute((
            "INSERT INTO notes (id, body) VALUES (?, ?), (?, ?)",
            Params::new().bind(1).bind("first").bind(2).bind("second"),
        ))
        .unwrap();
    assert_eq!(inserted, 2);

    let rows = repo.query("SELECT id, body FROM notes ORDER BY id").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1]["body"], json!("second"));

    let page = repo
        .page(&PageRequest::new("SELECT id FROM notes", 1, 2).order_by("id", true))
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.rows[0]["id"], json!(2));
}

#[test]
fn test_blocking_transaction_commits() {
    let dir = tempfile::tempdir().unwrap();
    let repo = repository(&dir);

    let id = repo
        .transaction(|tx| {
            tx.execute("INSERT INTO notes (id, body) VALUES (7, 'kept')")?;
            Ok::<_, DbError>(7)
        })
        .unwrap();
    assert_eq!(id, 7);
    assert_eq!(count(&repo), Some(json!(1)));
}

#[test]
fn test_blocking_transaction_rolls_back_on_error() {
    let dir = tempfile::tempdir().unwrap();
    let repo = repository(&dir);

    let mut handled = None;
    let result = repo
        .transaction_or_else(
            |tx| {
                tx.execute("INSERT INTO notes (id, body) VALUES (1, 'lost')")?;
                tx.execute("INSERT INTO nowhere VALUES (1)")?;
                Ok::<_, DbError>(())
            },
            |e| {
                handled = Some(e.to_string());
                Ok(())
            },
        )
        .unwrap();

    assert_eq!(result, None);
    assert!(handled.is_some());
    assert_eq!(count(&repo), Some(json!(0)));
}

#[test]
fn test_blocking_declined_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let repo = repository(&dir);

    let committed = repo
        .transaction_if(|tx| {
            tx.execute("INSERT INTO notes (id, body) VALUES (1, 'draft')")?;
            Ok::<_, DbError>(false)
        })
        .unwrap();
    assert!(!committed);
    assert_eq!(count(&repo), Some(json!(0)));
}

#[test]
fn test_dropped_blocking_transaction_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let repo = repository(&dir);

    {
        let mut tx = repo.begin_transaction().unwrap();
        assert_eq!(tx.state(), TransactionState::Active);
        tx.execute("INSERT INTO notes (id, body) VALUES (1, 'abandoned')")
            .unwrap();
    }
    assert_eq!(count(&repo), Some(json!(0)));

    let mut tx = repo.begin_transaction().unwrap();
    tx.execute("INSERT INTO notes (id, body) VALUES (2, 'explicit')")
        .unwrap();
    tx.commit().unwrap();
    assert_eq!(tx.state(), TransactionState::Committed);
    assert!(tx.rollback().is_err());
    drop(tx);
    assert_eq!(count(&repo), Some(json!(1)));
}
