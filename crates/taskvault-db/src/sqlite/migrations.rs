use rusqlite::Connection;

use crate::DbError;

use super::SqliteResultExt;

pub fn run(conn: &Connection) -> Result<(), DbError> {
    // Idempotent: every statement is CREATE ... IF NOT EXISTS
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            id           TEXT PRIMARY KEY,
            title        TEXT NOT NULL,
            title_tokens TEXT NOT NULL DEFAULT '[]',
            description  TEXT NOT NULL DEFAULT '',
            completed    INTEGER NOT NULL DEFAULT 0,
            attachments  TEXT NOT NULL DEFAULT '[]',
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_created   ON tasks(created_at);
        CREATE INDEX IF NOT EXISTS idx_tasks_completed ON tasks(completed, created_at);

        CREATE TABLE IF NOT EXISTS api_keys (
            id           TEXT PRIMARY KEY,
            name         TEXT NOT NULL,
            key_hash     TEXT NOT NULL UNIQUE,
            created_at   TEXT NOT NULL,
            last_used_at TEXT
        );
        ",
    )
    .to_db()?;
    Ok(())
}
