use chrono::{Duration, NaiveTime, Utc};
use rusqlite::{params, Connection, Row};

use taskvault_core::attachment::Attachment;
use taskvault_core::task::{title_tokens, CreateTask, Task, TaskFilter, UpdateTask};

use super::super::{SqliteDatabase, SqliteResultExt};
use crate::DbError;

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    let attachments_json: String = row.get("attachments")?;
    let attachments = serde_json::from_str(&attachments_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        completed: row.get("completed")?,
        attachments,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn tokens_json(title: &str) -> Result<String, DbError> {
    serde_json::to_string(&title_tokens(title)).map_err(|e| DbError::Internal(e.to_string()))
}

fn attachments_json(attachments: &[Attachment]) -> Result<String, DbError> {
    serde_json::to_string(attachments).map_err(|e| DbError::Internal(e.to_string()))
}

fn load_task(conn: &Connection, id: &str) -> Result<Task, DbError> {
    conn.query_row("SELECT * FROM tasks WHERE id = ?1", params![id], row_to_task)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("task {id}")),
            other => DbError::Internal(other.to_string()),
        })
}

fn store_attachments(conn: &Connection, task: &mut Task) -> Result<(), DbError> {
    task.updated_at = Utc::now();
    conn.execute(
        "UPDATE tasks SET attachments = ?1, updated_at = ?2 WHERE id = ?3",
        params![attachments_json(&task.attachments)?, task.updated_at, task.id],
    )
    .to_db()?;
    Ok(())
}

impl SqliteDatabase {
    pub fn create_task_sync(&self, input: &CreateTask) -> Result<Task, DbError> {
        self.with_conn(|conn| {
            let id = uuid::Uuid::new_v4().to_string();
            let now = Utc::now();
            conn.execute(
                "INSERT INTO tasks (id, title, title_tokens, description, completed, attachments, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, '[]', ?6, ?7)",
                params![
                    id,
                    input.title,
                    tokens_json(&input.title)?,
                    input.description,
                    input.completed,
                    now,
                    now,
                ],
            )
            .to_db()?;
            load_task(conn, &id)
        })
    }

    pub fn get_task_sync(&self, id: &str) -> Result<Task, DbError> {
        self.with_conn(|conn| load_task(conn, id))
    }

    pub fn list_tasks_sync(&self, filter: &TaskFilter) -> Result<Vec<Task>, DbError> {
        self.with_conn(|conn| {
            let mut sql = String::from("SELECT * FROM tasks WHERE 1=1");
            let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if let Some(ref word) = filter.title {
                param_values.push(Box::new(word.clone()));
                sql.push_str(&format!(
                    " AND EXISTS (SELECT 1 FROM json_each(tasks.title_tokens) WHERE json_each.value = ?{})",
                    param_values.len()
                ));
            }
            if let Some(date) = filter.date {
                let start = date.and_time(NaiveTime::MIN).and_utc();
                let end = start + Duration::days(1);
                param_values.push(Box::new(start));
                sql.push_str(&format!(" AND created_at >= ?{}", param_values.len()));
                param_values.push(Box::new(end));
                sql.push_str(&format!(" AND created_at < ?{}", param_values.len()));
            }
            if let Some(status) = filter.status {
                param_values.push(Box::new(status.completed()));
                sql.push_str(&format!(" AND completed = ?{}", param_values.len()));
            }

            sql.push_str(" ORDER BY created_at DESC");

            if let Some(limit) = filter.limit {
                param_values.push(Box::new(limit));
                sql.push_str(&format!(" LIMIT ?{}", param_values.len()));
            }

            let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                param_values.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&sql).to_db()?;
            let tasks = stmt
                .query_map(params_ref.as_slice(), row_to_task)
                .to_db()?
                .collect::<Result<Vec<_>, _>>()
                .to_db()?;
            Ok(tasks)
        })
    }

    pub fn update_task_sync(&self, id: &str, update: &UpdateTask) -> Result<Task, DbError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction().to_db()?;
            let mut task = load_task(&tx, id)?;
            if let Some(ref title) = update.title {
                task.title = title.clone();
            }
            if let Some(ref description) = update.description {
                task.description = description.clone();
            }
            if let Some(completed) = update.completed {
                task.completed = completed;
            }
            task.updated_at = Utc::now();
            tx.execute(
                "UPDATE tasks SET title = ?1, title_tokens = ?2, description = ?3, completed = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    task.title,
                    tokens_json(&task.title)?,
                    task.description,
                    task.completed,
                    task.updated_at,
                    id,
                ],
            )
            .to_db()?;
            tx.commit().to_db()?;
            Ok(task)
        })
    }

    pub fn delete_task_sync(&self, id: &str) -> Result<(), DbError> {
        self.with_conn(|conn| {
            let changed = conn
                .execute("DELETE FROM tasks WHERE id = ?1", params![id])
                .to_db()?;
            if changed == 0 {
                return Err(DbError::NotFound(format!("task {id}")));
            }
            Ok(())
        })
    }

    pub fn append_attachment_sync(
        &self,
        task_id: &str,
        attachment: &Attachment,
    ) -> Result<Task, DbError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction().to_db()?;
            let mut task = load_task(&tx, task_id)?;
            if task.has_attachment(&attachment.key) {
                return Err(DbError::Conflict(format!(
                    "attachment {} already on task {task_id}",
                    attachment.key
                )));
            }
            task.attachments.push(attachment.clone());
            store_attachments(&tx, &mut task)?;
            tx.commit().to_db()?;
            Ok(task)
        })
    }

    pub fn remove_attachment_sync(&self, task_id: &str, key: &str) -> Result<Task, DbError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction().to_db()?;
            let mut task = load_task(&tx, task_id)?;
            let before = task.attachments.len();
            task.attachments.retain(|a| a.key != key);
            if task.attachments.len() == before {
                return Err(DbError::NotFound(format!("attachment {key} on task {task_id}")));
            }
            store_attachments(&tx, &mut task)?;
            tx.commit().to_db()?;
            Ok(task)
        })
    }

    pub fn attachment_keys_sync(&self) -> Result<Vec<String>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT json_extract(a.value, '$.key')
                     FROM tasks, json_each(tasks.attachments) AS a
                     ORDER BY 1",
                )
                .to_db()?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .to_db()?
                .collect::<Result<Vec<_>, _>>()
                .to_db()?;
            Ok(keys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use taskvault_core::task::CompletionStatus;

    fn make_task(title: &str) -> CreateTask {
        CreateTask {
            title: title.to_string(),
            description: String::new(),
            completed: false,
        }
    }

    fn attachment(key: &str) -> Attachment {
        Attachment {
            key: key.to_string(),
            name: "a.png".into(),
            size: 10,
            content_type: "image/png".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn title_search_matches_whole_words() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.create_task_sync(&make_task("Buy MILK and eggs")).unwrap();
        db.create_task_sync(&make_task("Milkshake recipe")).unwrap();

        let filter = TaskFilter {
            title: Some("milk".into()),
            ..Default::default()
        };
        let found = db.list_tasks_sync(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Buy MILK and eggs");
    }

    #[test]
    fn date_filter_selects_one_utc_day() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let t = db.create_task_sync(&make_task("today")).unwrap();
        let today = t.created_at.date_naive();

        let hit = TaskFilter {
            date: Some(today),
            ..Default::default()
        };
        assert_eq!(db.list_tasks_sync(&hit).unwrap().len(), 1);

        let miss = TaskFilter {
            date: NaiveDate::from_ymd_opt(2001, 1, 1),
            ..Default::default()
        };
        assert!(db.list_tasks_sync(&miss).unwrap().is_empty());
    }

    #[test]
    fn status_filter_and_limit() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let a = db.create_task_sync(&make_task("a")).unwrap();
        db.create_task_sync(&make_task("b")).unwrap();
        db.create_task_sync(&make_task("c")).unwrap();
        db.update_task_sync(
            &a.id,
            &UpdateTask {
                completed: Some(true),
                ..Default::default()
            },
        )
        .unwrap();

        let done = TaskFilter {
            status: Some(CompletionStatus::Done),
            ..Default::default()
        };
        assert_eq!(db.list_tasks_sync(&done).unwrap().len(), 1);

        let active = TaskFilter {
            status: Some(CompletionStatus::Active),
            limit: Some(1),
            ..Default::default()
        };
        assert_eq!(db.list_tasks_sync(&active).unwrap().len(), 1);
    }

    #[test]
    fn attachment_ledger_roundtrip() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let t = db.create_task_sync(&make_task("with files")).unwrap();

        db.append_attachment_sync(&t.id, &attachment("k1")).unwrap();
        let task = db.append_attachment_sync(&t.id, &attachment("k2")).unwrap();
        assert_eq!(
            task.attachments.iter().map(|a| a.key.as_str()).collect::<Vec<_>>(),
            vec!["k1", "k2"]
        );

        let err = db.append_attachment_sync(&t.id, &attachment("k1")).unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        assert_eq!(db.attachment_keys_sync().unwrap(), vec!["k1", "k2"]);

        let task = db.remove_attachment_sync(&t.id, "k1").unwrap();
        assert_eq!(task.attachments.len(), 1);
        let err = db.remove_attachment_sync(&t.id, "k1").unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));

        let persisted = db.get_task_sync(&t.id).unwrap();
        assert_eq!(persisted.attachments, task.attachments);
    }
}
