use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use taskvault_core::attachment::{
    Attachment, AttachmentDescriptor, PresignPutRequest, PresignedUpload, PresignedUrl,
};
use taskvault_core::task::{CreateTask, Task, TaskFilter, UpdateTask};

use crate::{ServiceError, TaskService};

/// Async HTTP client implementation of TaskService.
/// Connects to a running taskvault-server.
pub struct HttpService {
    base_url: String,
    client: Client,
    api_key: Option<String>,
}

impl HttpService {
    pub fn new(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            base_url,
            client: Client::new(),
            api_key: None,
        }
    }

    pub fn with_api_key(base_url: &str, key: String) -> Self {
        Self {
            api_key: Some(key),
            ..Self::new(base_url)
        }
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Check if the server is reachable.
    /// Health endpoint is NOT authenticated.
    pub async fn health_check(&self) -> Result<(), ServiceError> {
        let resp = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| ServiceError::Internal(format!("connection failed: {e}")))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ServiceError::Internal(format!(
                "health check failed: {}",
                resp.status()
            )))
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, ServiceError> {
        let resp = self
            .with_auth(builder)
            .send()
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        handle_response(resp).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ServiceError> {
        self.send(self.client.get(self.url(path))).await
    }

    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ServiceError> {
        self.send(self.client.post(self.url(path)).json(body)).await
    }

    async fn put_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ServiceError> {
        self.send(self.client.put(self.url(path)).json(body)).await
    }

    async fn delete_req(&self, path: &str) -> Result<(), ServiceError> {
        let builder = self.client.delete(self.url(path));
        let resp = self
            .with_auth(builder)
            .send()
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(parse_error(resp).await)
        }
    }

    // -- Attachment convenience methods (not on trait) --

    /// Upload one file as a multipart body.
    pub async fn upload_attachment(
        &self,
        task_id: &str,
        filename: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<Task, ServiceError> {
        let part = Part::bytes(data)
            .file_name(filename.to_string())
            .mime_str(content_type)
            .map_err(|e| ServiceError::InvalidInput(format!("content type: {e}")))?;
        self.upload_form(task_id, Form::new().part("file", part)).await
    }

    /// Post an arbitrary multipart form to the upload endpoint.
    pub async fn upload_form(&self, task_id: &str, form: Form) -> Result<Task, ServiceError> {
        self.send(
            self.client
                .post(self.url(&format!("/tasks/{task_id}/attachments")))
                .multipart(form),
        )
        .await
    }

    /// Fetch an object through a presigned GET URL. No bearer token is sent.
    pub async fn fetch_presigned(&self, url: &str) -> Result<Bytes, ServiceError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            resp.bytes()
                .await
                .map_err(|e| ServiceError::Internal(format!("read body: {e}")))
        } else {
            Err(parse_error_with_status(status, resp).await)
        }
    }

    /// Upload an object through a presigned PUT URL.
    pub async fn put_presigned(
        &self,
        url: &str,
        content_type: &str,
        data: impl Into<Bytes>,
    ) -> Result<(), ServiceError> {
        let resp = self
            .client
            .put(url)
            .header("Content-Type", content_type)
            .body(data.into())
            .send()
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(parse_error(resp).await)
        }
    }
}

async fn handle_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ServiceError> {
    let status = resp.status();
    if status.is_success() {
        resp.json::<T>()
            .await
            .map_err(|e| ServiceError::Internal(format!("json decode: {e}")))
    } else {
        Err(parse_error_with_status(status, resp).await)
    }
}

async fn parse_error(resp: reqwest::Response) -> ServiceError {
    let status = resp.status();
    parse_error_with_status(status, resp).await
}

async fn parse_error_with_status(status: StatusCode, resp: reqwest::Response) -> ServiceError {
    let body = resp.text().await.unwrap_or_default();
    let msg = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"].as_str().map(String::from))
        .unwrap_or(body);

    match status {
        StatusCode::NOT_FOUND => ServiceError::NotFound(msg),
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ServiceError::InvalidInput(msg)
        }
        StatusCode::PAYLOAD_TOO_LARGE => ServiceError::PayloadTooLarge(msg),
        _ => ServiceError::Internal(msg),
    }
}

#[async_trait]
impl TaskService for HttpService {
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, ServiceError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(ref title) = filter.title {
            params.push(("title", title.clone()));
        }
        if let Some(date) = filter.date {
            params.push(("date", date.format("%Y-%m-%d").to_string()));
        }
        if let Some(status) = filter.status {
            params.push(("status", status.as_str().to_string()));
        }
        if let Some(limit) = filter.limit {
            params.push(("limit", limit.to_string()));
        }
        self.send(self.client.get(self.url("/tasks")).query(&params))
            .await
    }

    async fn get_task(&self, id: &str) -> Result<Task, ServiceError> {
        self.get_json(&format!("/tasks/{id}")).await
    }

    async fn create_task(&self, input: &CreateTask) -> Result<Task, ServiceError> {
        self.post_json("/tasks", input).await
    }

    async fn update_task(&self, id: &str, update: &UpdateTask) -> Result<Task, ServiceError> {
        self.put_json(&format!("/tasks/{id}"), update).await
    }

    async fn delete_task(&self, id: &str) -> Result<(), ServiceError> {
        self.delete_req(&format!("/tasks/{id}")).await
    }

    async fn list_attachments(&self, task_id: &str) -> Result<Vec<Attachment>, ServiceError> {
        self.get_json(&format!("/tasks/{task_id}/attachments"))
            .await
    }

    async fn remove_attachment(&self, task_id: &str, key: &str) -> Result<Task, ServiceError> {
        self.send(
            self.client
                .delete(self.url(&format!("/tasks/{task_id}/attachments")))
                .query(&[("key", key)]),
        )
        .await
    }

    async fn presign_attachment_get(
        &self,
        task_id: &str,
        key: &str,
    ) -> Result<PresignedUrl, ServiceError> {
        self.send(
            self.client
                .get(self.url(&format!("/tasks/{task_id}/attachments/presign-get")))
                .query(&[("key", key)]),
        )
        .await
    }

    async fn presign_attachment_put(
        &self,
        task_id: &str,
        request: &PresignPutRequest,
    ) -> Result<PresignedUpload, ServiceError> {
        self.post_json(&format!("/tasks/{task_id}/attachments/presign"), request)
            .await
    }

    async fn commit_attachment(
        &self,
        task_id: &str,
        descriptor: &AttachmentDescriptor,
    ) -> Result<Task, ServiceError> {
        self.post_json(&format!("/tasks/{task_id}/attachments/commit"), descriptor)
            .await
    }
}
