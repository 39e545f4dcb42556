//! Error types for AVOps.
//!
//! Only `Persistence` is allowed to escape an orchestration. Retrieval and
//! model failures are absorbed where they happen.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AvopsError {
    #[error("Failed to persist copilot run: {0}")]
    Persistence(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

}

impl AvopsError {
    /// HTTP status code the server answers with for this error
    pub fn status_code(&self) -> u16 {
        match self {
            AvopsError::InvalidRequest(_) => 400,
            AvopsError::NotFound(_) => 404,
            AvopsError::Persistence(_) | AvopsError::Storage(_) => 500,
        }
    }
}
