use thiserror::Error;

/// Coarse classification shared by every layer's error type. The HTTP
/// surface maps each class to exactly one status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ClientInput,
    PayloadTooLarge,
    NotFound,
    Storage,
    Internal,
}

impl ErrorClass {
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorClass::ClientInput => 400,
            ErrorClass::PayloadTooLarge => 413,
            ErrorClass::NotFound => 404,
            ErrorClass::Storage | ErrorClass::Internal => 500,
        }
    }

    /// Server-side failures whose details must not reach the client.
    pub fn is_server_fault(&self) -> bool {
        matches!(self, ErrorClass::Storage | ErrorClass::Internal)
    }
}

#[derive(Debug, Error)]
pub enum TaskvaultError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl TaskvaultError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TaskvaultError::NotFound(_) => ErrorClass::NotFound,
            TaskvaultError::InvalidInput(_) => ErrorClass::ClientInput,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_map_to_status_codes() {
        assert_eq!(ErrorClass::ClientInput.http_status(), 400);
        assert_eq!(ErrorClass::PayloadTooLarge.http_status(), 413);
        assert_eq!(ErrorClass::NotFound.http_status(), 404);
        assert_eq!(ErrorClass::Storage.http_status(), 500);
        assert_eq!(ErrorClass::Internal.http_status(), 500);
        assert!(ErrorClass::Storage.is_server_fault());
        assert!(!ErrorClass::PayloadTooLarge.is_server_fault());
    }
}
