pub(crate) mod migrations;
pub mod queries;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;

use taskvault_core::api_key::ApiKey;
use taskvault_core::attachment::Attachment;
use taskvault_core::task::{CreateTask, Task, TaskFilter, UpdateTask};

use crate::{Database, DbConfig, DbError};

/// Extension trait that converts `rusqlite::Result<T>` into `Result<T, DbError>`.
pub(crate) trait SqliteResultExt<T> {
    fn to_db(self) -> Result<T, DbError>;
}

impl<T> SqliteResultExt<T> for rusqlite::Result<T> {
    fn to_db(self) -> Result<T, DbError> {
        self.map_err(map_sqlite_err)
    }
}

#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    pub fn open(config: &DbConfig) -> Result<Self, DbError> {
        let path = config
            .sqlite_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| crate::data_dir().join("taskvault.db"));
        std::fs::create_dir_all(path.parent().unwrap_or(Path::new(".")))?;
        Self::open_path(&path)
    }

    pub fn open_path(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path).to_db()?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;",
        )
        .to_db()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        tracing::debug!(path = %path.display(), "opened sqlite database");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory().to_db()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> Result<T, DbError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| DbError::Internal("lock poisoned".into()))?;
        f(&conn)
    }

    fn run_migrations(&self) -> Result<(), DbError> {
        self.with_conn(|conn| {
            migrations::run(conn)?;
            Ok(())
        })
    }
}

/// Map a `rusqlite::Error` into a `DbError::Internal`.
pub(crate) fn map_sqlite_err(e: rusqlite::Error) -> DbError {
    DbError::Internal(e.to_string())
}

impl SqliteDatabase {
    /// Run a synchronous query on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, DbError>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteDatabase) -> Result<T, DbError> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| DbError::Internal(format!("blocking task: {e}")))?
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn create_task(&self, input: &CreateTask) -> Result<Task, DbError> {
        let input = input.clone();
        self.blocking(move |db| db.create_task_sync(&input)).await
    }

    async fn get_task(&self, id: &str) -> Result<Task, DbError> {
        let id = id.to_string();
        self.blocking(move |db| db.get_task_sync(&id)).await
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, DbError> {
        let filter = filter.clone();
        self.blocking(move |db| db.list_tasks_sync(&filter)).await
    }

    async fn update_task(&self, id: &str, update: &UpdateTask) -> Result<Task, DbError> {
        let (id, update) = (id.to_string(), update.clone());
        self.blocking(move |db| db.update_task_sync(&id, &update)).await
    }

    async fn delete_task(&self, id: &str) -> Result<(), DbError> {
        let id = id.to_string();
        self.blocking(move |db| db.delete_task_sync(&id)).await
    }

    async fn append_attachment(
        &self,
        task_id: &str,
        attachment: &Attachment,
    ) -> Result<Task, DbError> {
        let (task_id, attachment) = (task_id.to_string(), attachment.clone());
        self.blocking(move |db| db.append_attachment_sync(&task_id, &attachment))
            .await
    }

    async fn remove_attachment(&self, task_id: &str, key: &str) -> Result<Task, DbError> {
        let (task_id, key) = (task_id.to_string(), key.to_string());
        self.blocking(move |db| db.remove_attachment_sync(&task_id, &key))
            .await
    }

    async fn attachment_keys(&self) -> Result<Vec<String>, DbError> {
        self.blocking(|db| db.attachment_keys_sync()).await
    }

    async fn insert_api_key(&self, name: &str, key_hash: &str) -> Result<ApiKey, DbError> {
        let (name, key_hash) = (name.to_string(), key_hash.to_string());
        self.blocking(move |db| db.insert_api_key_sync(&name, &key_hash))
            .await
    }

    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, DbError> {
        let key_hash = key_hash.to_string();
        self.blocking(move |db| db.find_api_key_by_hash_sync(&key_hash))
            .await
    }

    async fn touch_api_key(&self, id: &str) -> Result<(), DbError> {
        let id = id.to_string();
        self.blocking(move |db| db.touch_api_key_sync(&id)).await
    }

    async fn has_api_keys(&self) -> Result<bool, DbError> {
        self.blocking(|db| db.has_api_keys_sync()).await
    }

    async fn list_api_keys(&self) -> Result<Vec<ApiKey>, DbError> {
        self.blocking(|db| db.list_api_keys_sync()).await
    }

    async fn delete_api_key(&self, id: &str) -> Result<(), DbError> {
        let id = id.to_string();
        self.blocking(move |db| db.delete_api_key_sync(&id)).await
    }
}
