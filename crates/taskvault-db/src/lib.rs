mod sqlite;

pub use sqlite::SqliteDatabase;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use taskvault_core::api_key::ApiKey;
use taskvault_core::attachment::Attachment;
use taskvault_core::task::{CreateTask, Task, TaskFilter, UpdateTask};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the record store lives.
#[derive(Debug, Clone, Default)]
pub struct DbConfig {
    /// SQLite file path. Defaults to `{data_dir}/taskvault.db`.
    pub sqlite_path: Option<String>,
}

impl DbConfig {
    pub fn from_env() -> Self {
        Self {
            sqlite_path: std::env::var("TASKVAULT_DB_PATH").ok(),
        }
    }
}

/// `$XDG_DATA_HOME/taskvault`, falling back to `~/.local/share/taskvault`.
pub fn data_dir() -> PathBuf {
    let base = if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg)
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".local/share")
    } else {
        PathBuf::from(".")
    };
    base.join("taskvault")
}

/// The task record store.
///
/// Every task is a single document: its attachment list is read and
/// rewritten as a whole. `append_attachment` and `remove_attachment` run
/// their read-modify-write inside one transaction.
#[async_trait]
pub trait Database: Send + Sync {
    // -- Tasks --
    async fn create_task(&self, input: &CreateTask) -> Result<Task, DbError>;
    async fn get_task(&self, id: &str) -> Result<Task, DbError>;
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, DbError>;
    async fn update_task(&self, id: &str, update: &UpdateTask) -> Result<Task, DbError>;
    async fn delete_task(&self, id: &str) -> Result<(), DbError>;

    // -- Attachment ledger --

    /// Append to a task's attachment list. `Conflict` if the key is already listed.
    async fn append_attachment(
        &self,
        task_id: &str,
        attachment: &Attachment,
    ) -> Result<Task, DbError>;

    /// Remove one entry by key. `NotFound` if the task or the key is absent.
    async fn remove_attachment(&self, task_id: &str, key: &str) -> Result<Task, DbError>;

    /// Every attachment key referenced by any task.
    async fn attachment_keys(&self) -> Result<Vec<String>, DbError>;

    // -- API keys --
    async fn insert_api_key(&self, name: &str, key_hash: &str) -> Result<ApiKey, DbError>;
    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, DbError>;
    async fn touch_api_key(&self, id: &str) -> Result<(), DbError>;
    async fn has_api_keys(&self) -> Result<bool, DbError>;
    async fn list_api_keys(&self) -> Result<Vec<ApiKey>, DbError>;
    async fn delete_api_key(&self, id: &str) -> Result<(), DbError>;
}
