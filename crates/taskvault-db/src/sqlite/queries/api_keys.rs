use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use taskvault_core::api_key::ApiKey;

use super::super::{SqliteDatabase, SqliteResultExt};
use crate::DbError;

const COLUMNS: &str = "id, name, key_hash, created_at, last_used_at";

fn row_to_api_key(row: &Row) -> rusqlite::Result<ApiKey> {
    Ok(ApiKey {
        id: row.get(0)?,
        name: row.get(1)?,
        key_hash: row.get(2)?,
        created_at: row.get(3)?,
        last_used_at: row.get(4)?,
    })
}

fn key_where(conn: &Connection, clause: &str, value: &str) -> Result<Option<ApiKey>, DbError> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM api_keys WHERE {clause} = ?1"),
        params![value],
        row_to_api_key,
    )
    .optional()
    .to_db()
}

impl SqliteDatabase {
    pub fn insert_api_key_sync(&self, name: &str, key_hash: &str) -> Result<ApiKey, DbError> {
        let key = ApiKey {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            key_hash: key_hash.to_string(),
            created_at: Utc::now(),
            last_used_at: None,
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO api_keys (id, name, key_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![key.id, key.name, key.key_hash, key.created_at],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    DbError::Conflict("api key already registered".into())
                }
                e => super::super::map_sqlite_err(e),
            })?;
            Ok(())
        })?;
        Ok(key)
    }

    pub fn find_api_key_by_hash_sync(&self, key_hash: &str) -> Result<Option<ApiKey>, DbError> {
        self.with_conn(|conn| key_where(conn, "key_hash", key_hash))
    }

    pub fn touch_api_key_sync(&self, id: &str) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2",
                params![Utc::now(), id],
            )
            .to_db()
            .map(|_| ())
        })
    }

    pub fn has_api_keys_sync(&self) -> Result<bool, DbError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT EXISTS (SELECT 1 FROM api_keys)", [], |row| {
                row.get::<_, bool>(0)
            })
            .to_db()
        })
    }

    /// Newest first.
    pub fn list_api_keys_sync(&self) -> Result<Vec<ApiKey>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {COLUMNS} FROM api_keys ORDER BY created_at DESC"
                ))
                .to_db()?;
            let rows = stmt.query_map([], row_to_api_key).to_db()?;
            rows.collect::<rusqlite::Result<Vec<_>>>().to_db()
        })
    }

    pub fn delete_api_key_sync(&self, id: &str) -> Result<(), DbError> {
        self.with_conn(|conn| {
            if key_where(conn, "id", id)?.is_none() {
                return Err(DbError::NotFound(format!("api key {id}")));
            }
            conn.execute("DELETE FROM api_keys WHERE id = ?1", params![id])
                .to_db()
                .map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{DbError, SqliteDatabase};

    #[test]
    fn key_lifecycle() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        assert!(!db.has_api_keys_sync().unwrap());

        let key = db.insert_api_key_sync("ci", "hash123").unwrap();
        assert_eq!(key.key_hash, "hash123");
        assert!(key.last_used_at.is_none());
        assert!(db.has_api_keys_sync().unwrap());

        let found = db.find_api_key_by_hash_sync("hash123").unwrap().unwrap();
        assert_eq!(found.id, key.id);
        assert_eq!(found.name, "ci");
        assert!(db.find_api_key_by_hash_sync("nonexistent").unwrap().is_none());

        db.touch_api_key_sync(&key.id).unwrap();
        let touched = db.find_api_key_by_hash_sync("hash123").unwrap().unwrap();
        assert!(touched.last_used_at.is_some());

        db.delete_api_key_sync(&key.id).unwrap();
        assert!(!db.has_api_keys_sync().unwrap());
        assert!(matches!(
            db.delete_api_key_sync(&key.id),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn listing_is_newest_first() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.insert_api_key_sync("first", "h1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        db.insert_api_key_sync("second", "h2").unwrap();

        let names: Vec<_> = db
            .list_api_keys_sync()
            .unwrap()
            .into_iter()
            .map(|k| k.name)
            .collect();
        assert_eq!(names, ["second", "first"]);
    }

    #[test]
    fn duplicate_hash_is_a_conflict() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.insert_api_key_sync("a", "same").unwrap();
        assert!(matches!(
            db.insert_api_key_sync("b", "same"),
            Err(DbError::Conflict(_))
        ));
    }
}
