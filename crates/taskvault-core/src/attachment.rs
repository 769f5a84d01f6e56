use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stored object referenced from a task's attachment list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub key: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

/// What an upload produces once the object store has confirmed the write.
/// Becomes an [`Attachment`] when committed to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDescriptor {
    pub key: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
}

impl AttachmentDescriptor {
    pub fn into_attachment(self, created_at: DateTime<Utc>) -> Attachment {
        Attachment {
            key: self.key,
            name: self.name,
            size: self.size,
            content_type: self.content_type,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignPutRequest {
    pub filename: String,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUpload {
    pub upload_url: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignedUrl {
    pub url: String,
}
