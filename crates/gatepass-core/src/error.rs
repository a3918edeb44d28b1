use thiserror::Error;

/// Errors crossing the collaborator boundary of the decision engine.
///
/// `DirectoryUnreachable` is the only resolver failure: an unknown card is a
/// normal `Lookup::NotFound`, never an error. Display strings never carry
/// photos or birth dates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("directory unreachable: {0}")]
    DirectoryUnreachable(String),

    #[error("registration sink failed: {0}")]
    SinkFailed(String),

    #[error("escort prompt closed: {0}")]
    PromptClosed(String),

    #[error("invalid photo encoding")]
    InvalidPhoto,

    #[error("invalid identity record: {0}")]
    InvalidRecord(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::DirectoryUnreachable("connection refused".into());
        assert_eq!(err.to_string(), "directory unreachable: connection refused");
        assert_eq!(CoreError::InvalidPhoto.to_string(), "invalid photo encoding");
    }

    #[test]
    fn test_from_serde_json() {
        let parse: Result<u32, _> = serde_json::from_str("not json");
        let err: CoreError = parse.unwrap_err().into();
        assert!(matches!(err, CoreError::Serialization(_)));
    }
}
