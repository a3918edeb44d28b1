use gatepass_core::{AuditEvent, CardId, EventId, PersonRole, RegistrationSink, Timestamp};
use gatepass_policy::Verdict;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};

// ---------------------------------------------------------------------------
// RetryPolicy — fixed-backoff redelivery of audit events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub fn validate(&self) -> SessionResult<()> {
        if !(1..=10).contains(&self.max_attempts) {
            return Err(SessionError::InvalidRetryPolicy(format!(
                "max_attempts must be between 1 and 10, got {}",
                self.max_attempts
            )));
        }
        Ok(())
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Single attempt, no waiting.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

/// Build the audit record of a finalized verdict.
pub fn audit_event(
    verdict: &Verdict,
    role: Option<PersonRole>,
    card_id: Option<CardId>,
) -> AuditEvent {
    AuditEvent {
        event_id: EventId::generate(),
        card_id,
        role,
        subject_name: verdict.subject.display_name(),
        authorized: verdict.authorized,
        severity: verdict.severity,
        reason: verdict.reason,
        status: verdict.status_label().to_string(),
        recorded_at: Timestamp::now(),
    }
}

// ---------------------------------------------------------------------------
// EventEmitter
// ---------------------------------------------------------------------------

/// Fire-and-forget delivery of finalized verdicts to registration sinks.
///
/// Each emission runs on its own task. Failures are retried per the policy,
/// then logged and dropped; nothing flows back into the session.
#[derive(Clone)]
pub struct EventEmitter {
    sinks: Vec<Arc<dyn RegistrationSink>>,
    retry: RetryPolicy,
}

impl EventEmitter {
    pub fn new(retry: RetryPolicy) -> SessionResult<Self> {
        retry.validate()?;
        Ok(Self {
            sinks: Vec::new(),
            retry,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn RegistrationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Spawn delivery of one verdict. The handle resolves to the number of
    /// sinks that accepted the event; callers are free to ignore it.
    pub fn emit(
        &self,
        verdict: &Verdict,
        role: Option<PersonRole>,
        card_id: Option<CardId>,
    ) -> JoinHandle<usize> {
        let event = audit_event(verdict, role, card_id);
        let sinks = self.sinks.clone();
        let retry = self.retry;

        tokio::spawn(async move {
            let mut delivered = 0;
            for sink in sinks {
                if deliver(sink.as_ref(), &event, retry).await {
                    delivered += 1;
                }
            }
            delivered
        })
    }
}

async fn deliver(sink: &dyn RegistrationSink, event: &AuditEvent, retry: RetryPolicy) -> bool {
    for attempt in 1..=retry.max_attempts {
        match sink.record(event).await {
            Ok(()) => {
                debug!(event = %event.event_id, attempt, "audit event recorded");
                return true;
            }
            Err(e) if attempt < retry.max_attempts => {
                debug!(event = %event.event_id, attempt, error = %e, "audit emission failed, retrying");
                tokio::time::sleep(retry.backoff()).await;
            }
            Err(e) => {
                warn!(
                    event = %event.event_id,
                    attempts = retry.max_attempts,
                    error = %e,
                    "audit event dropped"
                );
            }
        }
    }
    false
}
