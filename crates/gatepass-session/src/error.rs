use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("a card is already being evaluated")]
    Busy,

    #[error("cannot reach server: {0}")]
    Unreachable(String),

    #[error("cycle cancelled by reset")]
    Cancelled,

    #[error("escort prompt failed: {0}")]
    Prompt(String),

    #[error("no escort question is pending")]
    NoPendingQuestion,

    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    #[error("audit log failure: {0}")]
    AuditFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SessionResult<T> = Result<T, SessionError>;
