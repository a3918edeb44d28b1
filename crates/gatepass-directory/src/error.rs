use gatepass_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("identity not found: {0}")]
    IdentityNotFound(String),

    #[error("card {card_id} is already bound to another identity")]
    CardAlreadyBound { card_id: String },

    #[error("identity {identity_id} already has a card")]
    AlreadyBound { identity_id: String },

    #[error("cannot reach server: {0}")]
    Unreachable(String),

    #[error("invalid response from directory: {0}")]
    InvalidResponse(String),

    #[error("invalid identity record: {0}")]
    InvalidRecord(String),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

impl DirectoryError {
    /// Collapse into the only failure a resolver may report.
    pub fn into_lookup_error(self) -> CoreError {
        CoreError::DirectoryUnreachable(self.to_string())
    }

    pub fn into_sink_error(self) -> CoreError {
        CoreError::SinkFailed(self.to_string())
    }
}

impl From<rusqlite::Error> for DirectoryError {
    fn from(e: rusqlite::Error) -> Self {
        DirectoryError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for DirectoryError {
    fn from(e: serde_json::Error) -> Self {
        DirectoryError::InvalidResponse(e.to_string())
    }
}
