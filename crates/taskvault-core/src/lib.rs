pub mod api_key;
pub mod attachment;
pub mod error;
pub mod policy;
pub mod task;

pub use api_key::ApiKey;
pub use attachment::{Attachment, AttachmentDescriptor, PresignPutRequest, PresignedUpload, PresignedUrl};
pub use error::{ErrorClass, TaskvaultError};
pub use policy::UploadPolicy;
pub use task::{CompletionStatus, CreateTask, Task, TaskFilter, UpdateTask};
