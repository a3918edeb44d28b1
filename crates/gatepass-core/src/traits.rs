use async_trait::async_trait;

use crate::error::CoreResult;
use crate::types::{AuditEvent, CardId, EscortAnswer, IdentityRecord};

// ---------------------------------------------------------------------------
// IdentityDirectory — card identifier → identity record
//
// A pure lookup. Implementations must return at most one record per card and
// must not cache across calls: a rebound card has to resolve to its new owner
// on the very next scan.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(IdentityRecord),
    NotFound,
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Resolve a card identifier. Fails only with
    /// [`CoreError::DirectoryUnreachable`](crate::CoreError::DirectoryUnreachable).
    async fn resolve(&self, card_id: &CardId) -> CoreResult<Lookup>;
}

// ---------------------------------------------------------------------------
// RegistrationSink — best-effort persistence of finalized decisions
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RegistrationSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> CoreResult<()>;
}

// ---------------------------------------------------------------------------
// EscortPrompt — the human decision for unaccompanied minors
// ---------------------------------------------------------------------------

#[async_trait]
pub trait EscortPrompt: Send + Sync {
    /// Ask whether `subject` is accompanied by an adult. Suspends until the
    /// operator answers; the caller drops the future to cancel.
    async fn ask(&self, subject: &IdentityRecord) -> CoreResult<EscortAnswer>;
}
