use taskvault_core::error::ErrorClass;
use taskvault_store::StoreError;

/// Why an upload did not produce an attachment. A session keeps only the
/// first failure it observes.
#[derive(Debug, thiserror::Error)]
pub enum UploadFailure {
    #[error("unsupported content type: {0}")]
    UnsupportedType(String),

    #[error("file exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("no file in request")]
    NoFile,

    #[error("only one file may be uploaded per request")]
    MultipleFiles,

    #[error("file is empty")]
    EmptyFile,

    #[error("malformed multipart body: {0}")]
    Malformed(String),

    #[error("client aborted the upload")]
    Aborted,

    #[error("could not decode image: {0}")]
    UndecodableImage(String),

    #[error("image transform failed: {0}")]
    Transform(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl UploadFailure {
    pub fn class(&self) -> ErrorClass {
        match self {
            UploadFailure::UnsupportedType(_)
            | UploadFailure::NoFile
            | UploadFailure::MultipleFiles
            | UploadFailure::EmptyFile
            | UploadFailure::Malformed(_)
            | UploadFailure::Aborted
            | UploadFailure::UndecodableImage(_) => ErrorClass::ClientInput,
            UploadFailure::TooLarge { .. } => ErrorClass::PayloadTooLarge,
            UploadFailure::Transform(_) => ErrorClass::Internal,
            UploadFailure::Storage(StoreError::InvalidKey(_)) => ErrorClass::ClientInput,
            UploadFailure::Storage(_) => ErrorClass::Storage,
        }
    }
}
