//! Gatepass Decision Session
//!
//! Drives one gate terminal: resolve a scanned card, evaluate the policy,
//! suspend for an escort answer when required, and hand the finalized
//! verdict to the registration sinks without waiting for them.
//!
//! Key features:
//! - One card in flight per session; a second scan is rejected as `Busy`
//! - `reset()` cancels any suspension (lookup or escort question)
//! - Cycle numbering so a cancelled cycle can never install a verdict
//! - Fire-and-forget audit emission with fixed-backoff retries
//! - Hash-chained in-memory audit log

pub mod audit;
pub mod emitter;
pub mod error;
pub mod prompt;
pub mod session;

pub use audit::{AuditLog, ChainedEvent, DEFAULT_AUDIT_CAPACITY};
pub use emitter::{audit_event, EventEmitter, RetryPolicy};
pub use error::{SessionError, SessionResult};
pub use prompt::{PendingEscortPrompt, PendingQuestion};
pub use session::{
    local_today, Clock, DecisionSession, SessionSnapshot, SessionState, Status,
};
