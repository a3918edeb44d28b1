use thiserror::Error;

/// Error type for the gatepass binary, aggregating the errors of every
/// workspace crate.
#[derive(Debug, Error)]
pub enum RootError {
    #[error("policy error: {0}")]
    Policy(#[from] gatepass_policy::PolicyError),

    #[error("directory error: {0}")]
    Directory(#[from] gatepass_directory::DirectoryError),

    #[error("session error: {0}")]
    Session(#[from] gatepass_session::SessionError),

    #[error("{0}")]
    Core(#[from] gatepass_core::CoreError),

    #[error("not available with a remote directory: {0}")]
    Unsupported(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for RootError {
    fn from(e: serde_json::Error) -> Self {
        RootError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for RootError {
    fn from(e: toml::de::Error) -> Self {
        RootError::Config(format!("TOML parse error: {}", e))
    }
}

pub type RootResult<T> = Result<T, RootError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_error_display() {
        let err = RootError::Config("directory.url is required".into());
        assert_eq!(
            err.to_string(),
            "configuration error: directory.url is required"
        );
    }

    #[test]
    fn test_root_error_from_session() {
        let err: RootError = gatepass_session::SessionError::Busy.into();
        assert!(matches!(err, RootError::Session(_)));
        assert!(err.to_string().contains("already being evaluated"));
    }

    #[test]
    fn test_root_error_from_directory() {
        let err: RootError = gatepass_directory::DirectoryError::IdentityNotFound("s-9".into()).into();
        assert!(err.to_string().contains("s-9"));
    }

    #[test]
    fn test_root_error_from_toml() {
        let parse: Result<toml::Value, _> = toml::from_str("= broken");
        let err: RootError = parse.unwrap_err().into();
        assert!(matches!(err, RootError::Config(_)));
    }
}
