use chrono::{DateTime, Utc};
use serde::Serialize;

/// A bearer key as stored: only the SHA-256 of the raw key is kept.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKey {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}
