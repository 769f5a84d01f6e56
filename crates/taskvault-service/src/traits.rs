use async_trait::async_trait;
use taskvault_core::attachment::{
    Attachment, AttachmentDescriptor, PresignPutRequest, PresignedUpload, PresignedUrl,
};
use taskvault_core::error::{ErrorClass, TaskvaultError};
use taskvault_core::task::{CreateTask, Task, TaskFilter, UpdateTask};
use taskvault_store::StoreError;
use taskvault_upload::UploadFailure;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ServiceError::NotFound(_) => ErrorClass::NotFound,
            ServiceError::InvalidInput(_) => ErrorClass::ClientInput,
            ServiceError::PayloadTooLarge(_) => ErrorClass::PayloadTooLarge,
            ServiceError::Storage(_) => ErrorClass::Storage,
            ServiceError::Internal(_) => ErrorClass::Internal,
        }
    }
}

impl From<TaskvaultError> for ServiceError {
    fn from(e: TaskvaultError) -> Self {
        match e {
            TaskvaultError::NotFound(msg) => ServiceError::NotFound(msg),
            TaskvaultError::InvalidInput(msg) => ServiceError::InvalidInput(msg),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => ServiceError::NotFound(msg),
            StoreError::InvalidKey(msg) => ServiceError::InvalidInput(msg),
            StoreError::Aborted(msg) => ServiceError::InvalidInput(msg),
            StoreError::Internal(msg) => ServiceError::Storage(msg),
        }
    }
}

impl From<UploadFailure> for ServiceError {
    fn from(e: UploadFailure) -> Self {
        let msg = e.to_string();
        match e.class() {
            ErrorClass::ClientInput => ServiceError::InvalidInput(msg),
            ErrorClass::PayloadTooLarge => ServiceError::PayloadTooLarge(msg),
            ErrorClass::NotFound => ServiceError::NotFound(msg),
            ErrorClass::Storage => ServiceError::Storage(msg),
            ErrorClass::Internal => ServiceError::Internal(msg),
        }
    }
}

/// Task and attachment operations shared by the local and remote backends.
///
/// `LocalService` talks to SQLite and the object store directly.
/// `HttpService` wraps an async HTTP client pointed at a running server.
/// Uploading a file is not on the trait: each backend takes its body in a
/// different shape.
#[async_trait]
pub trait TaskService: Send + Sync {
    // -- Tasks --
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, ServiceError>;
    async fn get_task(&self, id: &str) -> Result<Task, ServiceError>;
    async fn create_task(&self, input: &CreateTask) -> Result<Task, ServiceError>;
    async fn update_task(&self, id: &str, update: &UpdateTask) -> Result<Task, ServiceError>;
    /// Deletes the task's stored objects (best effort), then the record.
    async fn delete_task(&self, id: &str) -> Result<(), ServiceError>;

    // -- Attachments --
    async fn list_attachments(&self, task_id: &str) -> Result<Vec<Attachment>, ServiceError>;
    async fn remove_attachment(&self, task_id: &str, key: &str) -> Result<Task, ServiceError>;
    async fn presign_attachment_get(
        &self,
        task_id: &str,
        key: &str,
    ) -> Result<PresignedUrl, ServiceError>;
    async fn presign_attachment_put(
        &self,
        task_id: &str,
        request: &PresignPutRequest,
    ) -> Result<PresignedUpload, ServiceError>;
    /// Record an object uploaded through a presigned PUT.
    async fn commit_attachment(
        &self,
        task_id: &str,
        descriptor: &AttachmentDescriptor,
    ) -> Result<Task, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_failures_keep_their_class() {
        let e: ServiceError = UploadFailure::TooLarge { limit: 5 }.into();
        assert!(matches!(e, ServiceError::PayloadTooLarge(_)));
        assert_eq!(e.class().http_status(), 413);

        let e: ServiceError = UploadFailure::MultipleFiles.into();
        assert_eq!(e.class().http_status(), 400);

        let e: ServiceError = UploadFailure::Storage(StoreError::Internal("disk".into())).into();
        assert!(matches!(e, ServiceError::Storage(_)));
    }

    #[test]
    fn store_errors_map_by_kind() {
        let e: ServiceError = StoreError::InvalidKey("../x".into()).into();
        assert!(matches!(e, ServiceError::InvalidInput(_)));
        let e: ServiceError = StoreError::Internal("503".into()).into();
        assert_eq!(e.class().http_status(), 500);
    }
}
