// Backend-agnostic integration tests for the Database trait.
//
// Each public async function accepts `&dyn Database` so the same assertions
// hold for any backend.

use chrono::Utc;

use taskvault_core::attachment::Attachment;
use taskvault_core::task::{CompletionStatus, CreateTask, TaskFilter, UpdateTask};
use taskvault_db::{Database, DbError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_task(title: &str) -> CreateTask {
    CreateTask {
        title: title.to_string(),
        description: String::new(),
        completed: false,
    }
}

fn make_attachment(key: &str) -> Attachment {
    Attachment {
        key: key.to_string(),
        name: "photo.png".into(),
        size: 512_000,
        content_type: "image/png".into(),
        created_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Task tests
// ---------------------------------------------------------------------------

/// Create, get, update, delete; missing ids surface as NotFound.
pub async fn test_task_crud(db: &dyn Database) {
    let t = db
        .create_task(&CreateTask {
            title: "Write report".into(),
            description: "quarterly".into(),
            completed: false,
        })
        .await
        .unwrap();
    assert_eq!(t.title, "Write report");
    assert_eq!(t.description, "quarterly");
    assert!(!t.completed);
    assert!(t.attachments.is_empty());

    let fetched = db.get_task(&t.id).await.unwrap();
    assert_eq!(fetched.id, t.id);

    let updated = db
        .update_task(
            &t.id,
            &UpdateTask {
                title: Some("Write final report".into()),
                completed: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.title, "Write final report");
    assert_eq!(updated.description, "quarterly");
    assert!(updated.completed);
    assert!(updated.updated_at >= t.updated_at);

    db.delete_task(&t.id).await.unwrap();
    assert!(matches!(db.get_task(&t.id).await, Err(DbError::NotFound(_))));
    assert!(matches!(db.delete_task(&t.id).await, Err(DbError::NotFound(_))));
    assert!(matches!(
        db.update_task("missing", &UpdateTask::default()).await,
        Err(DbError::NotFound(_))
    ));
}

/// Listing is newest first and honours title/status filters.
pub async fn test_task_filtering(db: &dyn Database) {
    let first = db.create_task(&make_task("Alpha release notes")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = db.create_task(&make_task("Beta release")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let third = db.create_task(&make_task("Gamma")).await.unwrap();

    let all = db.list_tasks(&TaskFilter::default()).await.unwrap();
    let ids: Vec<_> = all.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec![third.id.as_str(), second.id.as_str(), first.id.as_str()]);

    let release = db
        .list_tasks(&TaskFilter {
            title: Some("release".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(release.len(), 2);

    db.update_task(
        &second.id,
        &UpdateTask {
            completed: Some(true),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let active_release = db
        .list_tasks(&TaskFilter {
            title: Some("release".into()),
            status: Some(CompletionStatus::Active),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(active_release.len(), 1);
    assert_eq!(active_release[0].id, first.id);

    let today = db
        .list_tasks(&TaskFilter {
            date: Some(Utc::now().date_naive()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(today.len(), 3);
}

// ---------------------------------------------------------------------------
// Attachment ledger tests
// ---------------------------------------------------------------------------

/// Appends keep insertion order; removal of unknown keys is NotFound.
pub async fn test_attachment_ledger(db: &dyn Database) {
    let t = db.create_task(&make_task("with photos")).await.unwrap();

    db.append_attachment(&t.id, &make_attachment("tasks/x/attachments/1/a.png"))
        .await
        .unwrap();
    let task = db
        .append_attachment(&t.id, &make_attachment("tasks/x/attachments/2/b.png"))
        .await
        .unwrap();
    assert_eq!(task.attachments.len(), 2);
    assert_eq!(task.attachments[0].key, "tasks/x/attachments/1/a.png");
    assert_eq!(task.attachments[1].size, 512_000);

    let dup = db
        .append_attachment(&t.id, &make_attachment("tasks/x/attachments/1/a.png"))
        .await;
    assert!(matches!(dup, Err(DbError::Conflict(_))));

    let missing_task = db
        .append_attachment("no-such-task", &make_attachment("k"))
        .await;
    assert!(matches!(missing_task, Err(DbError::NotFound(_))));

    let task = db
        .remove_attachment(&t.id, "tasks/x/attachments/1/a.png")
        .await
        .unwrap();
    assert_eq!(task.attachments.len(), 1);

    let again = db.remove_attachment(&t.id, "tasks/x/attachments/1/a.png").await;
    assert!(matches!(again, Err(DbError::NotFound(_))));
    let no_task = db.remove_attachment("no-such-task", "k").await;
    assert!(matches!(no_task, Err(DbError::NotFound(_))));

    let stored = db.get_task(&t.id).await.unwrap();
    assert_eq!(stored.attachments, task.attachments);
}

/// Referenced keys span all tasks and disappear with their task.
pub async fn test_attachment_keys(db: &dyn Database) {
    let a = db.create_task(&make_task("a")).await.unwrap();
    let b = db.create_task(&make_task("b")).await.unwrap();
    db.append_attachment(&a.id, &make_attachment("ka")).await.unwrap();
    db.append_attachment(&b.id, &make_attachment("kb")).await.unwrap();

    let mut keys = db.attachment_keys().await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["ka", "kb"]);

    db.delete_task(&a.id).await.unwrap();
    assert_eq!(db.attachment_keys().await.unwrap(), vec!["kb"]);
}

// ---------------------------------------------------------------------------
// API key tests
// ---------------------------------------------------------------------------

pub async fn test_api_keys(db: &dyn Database) {
    assert!(!db.has_api_keys().await.unwrap());
    let key = db.insert_api_key("deploy", "abc123").await.unwrap();
    assert!(db.has_api_keys().await.unwrap());

    let found = db.find_api_key_by_hash("abc123").await.unwrap().unwrap();
    assert_eq!(found.id, key.id);
    db.touch_api_key(&key.id).await.unwrap();
    assert!(db
        .find_api_key_by_hash("abc123")
        .await
        .unwrap()
        .unwrap()
        .last_used_at
        .is_some());

    assert_eq!(db.list_api_keys().await.unwrap().len(), 1);
    db.delete_api_key(&key.id).await.unwrap();
    assert!(db.find_api_key_by_hash("abc123").await.unwrap().is_none());
}
