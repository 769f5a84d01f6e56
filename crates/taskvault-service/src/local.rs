use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use taskvault_core::attachment::{
    Attachment, AttachmentDescriptor, PresignPutRequest, PresignedUpload, PresignedUrl,
};
use taskvault_core::task::{CreateTask, Task, TaskFilter, UpdateTask};
use taskvault_core::UploadPolicy;
use taskvault_db::{Database, DbError};
use taskvault_store::{
    derive_attachment_key, sanitize_filename, task_attachments_prefix, validate_key, ObjectStore,
    StoreError, TASKS_PREFIX,
};
use taskvault_upload::{PartSource, UploadConfig, Uploader};

use crate::{ServiceError, TaskService};

pub const DEFAULT_PRESIGN_TTL: Duration = Duration::from_secs(300);

/// The result of deleting one object during a bulk removal.
#[derive(Debug)]
pub struct DeletionOutcome {
    pub key: String,
    pub result: Result<(), StoreError>,
}

/// Local implementation backed by the record store and object store directly.
pub struct LocalService {
    db: Arc<dyn Database>,
    store: Arc<dyn ObjectStore>,
    uploader: Uploader,
    presign_ttl: Duration,
}

impl LocalService {
    pub fn new(db: Arc<dyn Database>, store: Arc<dyn ObjectStore>, upload: UploadConfig) -> Self {
        let uploader = Uploader::new(store.clone(), upload);
        Self {
            db,
            store,
            uploader,
            presign_ttl: DEFAULT_PRESIGN_TTL,
        }
    }

    pub fn with_presign_ttl(mut self, ttl: Duration) -> Self {
        self.presign_ttl = ttl;
        self
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.uploader.config().policy
    }

    /// Run the streaming pipeline for one request body and record the result.
    ///
    /// The task must exist before any bytes are stored; if it does not, the
    /// body is drained and discarded.
    pub async fn upload_attachment(
        &self,
        task_id: &str,
        source: &mut dyn PartSource,
    ) -> Result<Task, ServiceError> {
        if let Err(e) = self.db.get_task(task_id).await {
            taskvault_upload::drain(source).await;
            return Err(e.into());
        }

        let descriptor = self.uploader.upload(task_id, source).await?;
        let key = descriptor.key.clone();
        match self
            .db
            .append_attachment(task_id, &descriptor.into_attachment(Utc::now()))
            .await
        {
            Ok(task) => Ok(task),
            Err(e) => {
                tracing::warn!(%task_id, %key, error = %e, "ledger append failed, discarding object");
                if let Err(del) = self.store.delete(&key).await {
                    tracing::warn!(%key, error = %del, "could not discard uploaded object");
                }
                Err(e.into())
            }
        }
    }

    /// Delete every key independently. Failures are logged and reported in
    /// the returned outcomes, never propagated.
    pub async fn bulk_remove_objects(&self, keys: &[String]) -> Vec<DeletionOutcome> {
        let deletions = keys.iter().map(|key| async move {
            let result = match self.store.delete(key).await {
                Err(StoreError::NotFound(_)) => Ok(()),
                other => other,
            };
            if let Err(ref e) = result {
                tracing::warn!(%key, error = %e, "failed to delete object");
            }
            DeletionOutcome {
                key: key.clone(),
                result,
            }
        });
        futures::future::join_all(deletions).await
    }

    /// Delete a task and its objects, reporting what happened to each object.
    /// The record is deleted even when some objects could not be.
    pub async fn delete_task_with_outcomes(
        &self,
        id: &str,
    ) -> Result<Vec<DeletionOutcome>, ServiceError> {
        let task = self.db.get_task(id).await?;
        let keys: Vec<String> = task.attachments.iter().map(|a| a.key.clone()).collect();
        let outcomes = self.bulk_remove_objects(&keys).await;

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        if failed > 0 {
            tracing::warn!(task_id = %id, failed, total = outcomes.len(), "task deleted with leftover objects");
        }

        self.db.delete_task(id).await?;
        Ok(outcomes)
    }

    /// Objects under `tasks/` that no task references. Unless `dry_run`, they
    /// are deleted as well.
    pub async fn sweep_orphans(&self, dry_run: bool) -> Result<Vec<String>, ServiceError> {
        let referenced: HashSet<String> = self.db.attachment_keys().await?.into_iter().collect();
        let orphans: Vec<String> = self
            .store
            .list(TASKS_PREFIX)
            .await?
            .into_iter()
            .filter(|k| !referenced.contains(k))
            .collect();

        if !dry_run && !orphans.is_empty() {
            let outcomes = self.bulk_remove_objects(&orphans).await;
            let removed = outcomes.iter().filter(|o| o.result.is_ok()).count();
            tracing::info!(removed, found = orphans.len(), "swept orphaned objects");
        }
        Ok(orphans)
    }

    async fn task_with_attachment(&self, task_id: &str, key: &str) -> Result<Task, ServiceError> {
        let task = self.db.get_task(task_id).await?;
        if !task.has_attachment(key) {
            return Err(ServiceError::NotFound(format!(
                "attachment {key} on task {task_id}"
            )));
        }
        Ok(task)
    }

    fn check_content_type(&self, content_type: &str) -> Result<(), ServiceError> {
        if self.policy().allows(content_type) {
            Ok(())
        } else {
            Err(ServiceError::InvalidInput(format!(
                "unsupported content type: {content_type}"
            )))
        }
    }
}

impl From<DbError> for ServiceError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(msg) => ServiceError::NotFound(msg),
            DbError::Conflict(msg) => ServiceError::InvalidInput(msg),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

#[async_trait]
impl TaskService for LocalService {
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, ServiceError> {
        Ok(self.db.list_tasks(filter).await?)
    }

    async fn get_task(&self, id: &str) -> Result<Task, ServiceError> {
        Ok(self.db.get_task(id).await?)
    }

    async fn create_task(&self, input: &CreateTask) -> Result<Task, ServiceError> {
        let input = input.clone().normalized()?;
        Ok(self.db.create_task(&input).await?)
    }

    async fn update_task(&self, id: &str, update: &UpdateTask) -> Result<Task, ServiceError> {
        let update = update.clone().normalized()?;
        Ok(self.db.update_task(id, &update).await?)
    }

    async fn delete_task(&self, id: &str) -> Result<(), ServiceError> {
        self.delete_task_with_outcomes(id).await.map(|_| ())
    }

    async fn list_attachments(&self, task_id: &str) -> Result<Vec<Attachment>, ServiceError> {
        Ok(self.db.get_task(task_id).await?.attachments)
    }

    async fn remove_attachment(&self, task_id: &str, key: &str) -> Result<Task, ServiceError> {
        self.task_with_attachment(task_id, key).await?;
        // Storage first: a failed delete leaves the ledger entry in place.
        match self.store.delete(key).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(self.db.remove_attachment(task_id, key).await?)
    }

    async fn presign_attachment_get(
        &self,
        task_id: &str,
        key: &str,
    ) -> Result<PresignedUrl, ServiceError> {
        self.task_with_attachment(task_id, key).await?;
        let url = self.store.presign_get(key, self.presign_ttl).await?;
        Ok(PresignedUrl { url })
    }

    async fn presign_attachment_put(
        &self,
        task_id: &str,
        request: &PresignPutRequest,
    ) -> Result<PresignedUpload, ServiceError> {
        self.db.get_task(task_id).await?;
        self.check_content_type(&request.content_type)?;
        let key = derive_attachment_key(task_id, &request.filename);
        let upload_url = self
            .store
            .presign_put(&key, &request.content_type, self.presign_ttl)
            .await?;
        Ok(PresignedUpload { upload_url, key })
    }

    async fn commit_attachment(
        &self,
        task_id: &str,
        descriptor: &AttachmentDescriptor,
    ) -> Result<Task, ServiceError> {
        self.db.get_task(task_id).await?;

        validate_key(&descriptor.key)?;
        if !descriptor.key.starts_with(&task_attachments_prefix(task_id)) {
            return Err(ServiceError::InvalidInput(format!(
                "key {} does not belong to task {task_id}",
                descriptor.key
            )));
        }
        self.check_content_type(&descriptor.content_type)?;
        if !self.policy().within_limit(descriptor.size) {
            return Err(ServiceError::PayloadTooLarge(format!(
                "{} bytes exceeds the {} byte limit",
                descriptor.size,
                self.policy().max_upload_bytes
            )));
        }
        if !self.store.exists(&descriptor.key).await? {
            return Err(ServiceError::InvalidInput(format!(
                "object {} has not been uploaded",
                descriptor.key
            )));
        }

        let attachment = AttachmentDescriptor {
            name: sanitize_filename(&descriptor.name),
            ..descriptor.clone()
        }
        .into_attachment(Utc::now());
        Ok(self.db.append_attachment(task_id, &attachment).await?)
    }
}
