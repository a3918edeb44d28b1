use thiserror::Error;

/// Errors raised while configuring the policy engine.
///
/// Evaluation itself never fails: every reachable exit of the state machine
/// is a valid verdict.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("adult age must be between 1 and {max}, got {got}")]
    InvalidAdultAge { got: u32, max: u32 },

    #[error("validation error: {0}")]
    ValidationError(String),
}

pub type PolicyResult<T> = Result<T, PolicyError>;
