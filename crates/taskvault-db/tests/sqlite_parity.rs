// Integration tests that exercise every Database trait method against the
// in-memory SQLite backend. The test logic lives in `common/mod.rs`.

mod common;

use std::sync::Arc;
use taskvault_db::Database;

async fn make_db() -> Arc<dyn Database> {
    Arc::new(taskvault_db::SqliteDatabase::open_in_memory().unwrap())
}

#[tokio::test]
async fn task_crud() {
    let db = make_db().await;
    common::test_task_crud(&*db).await;
}

#[tokio::test]
async fn task_filtering() {
    let db = make_db().await;
    common::test_task_filtering(&*db).await;
}

#[tokio::test]
async fn attachment_ledger() {
    let db = make_db().await;
    common::test_attachment_ledger(&*db).await;
}

#[tokio::test]
async fn attachment_keys() {
    let db = make_db().await;
    common::test_attachment_keys(&*db).await;
}

#[tokio::test]
async fn api_keys() {
    let db = make_db().await;
    common::test_api_keys(&*db).await;
}

#[tokio::test]
async fn file_backed_db_persists_across_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("tv.db");
    let id = {
        let db = taskvault_db::SqliteDatabase::open_path(&path).unwrap();
        db.create_task(&taskvault_core::task::CreateTask {
            title: "persisted".into(),
            description: String::new(),
            completed: false,
        })
        .await
        .unwrap()
        .id
    };
    let db = taskvault_db::SqliteDatabase::open_path(&path).unwrap();
    assert_eq!(db.get_task(&id).await.unwrap().title, "persisted");
}
