use chrono::NaiveDate;
use gatepass_core::{CardId, EscortPrompt, IdentityDirectory, IdentityRecord, Lookup};
use gatepass_policy::{Evaluation, PolicyEngine, Verdict};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::emitter::EventEmitter;
use crate::error::{SessionError, SessionResult};

// ---------------------------------------------------------------------------
// SessionState / Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Scanning,
    AwaitingEscort,
    Resolved,
}

impl SessionState {
    /// A cycle is running and a new one would be rejected.
    pub fn is_in_flight(self) -> bool {
        matches!(self, SessionState::Scanning | SessionState::AwaitingEscort)
    }
}

/// Published on every transition. `cycle` changes on every scan and reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub cycle: u64,
    pub state: SessionState,
}

/// Point-in-time view of a session for presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub verdict: Option<Verdict>,
    /// Minor whose escort answer is awaited.
    pub awaiting: Option<IdentityRecord>,
}

/// Source of the evaluation date.
pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub fn local_today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

struct Inner {
    cycle: u64,
    state: SessionState,
    verdict: Option<Verdict>,
    awaiting: Option<IdentityRecord>,
}

// ---------------------------------------------------------------------------
// DecisionSession
// ---------------------------------------------------------------------------

/// One gate terminal: at most one card in flight, at most one live verdict.
///
/// Every await inside a cycle races the status channel. A `reset()` bumps
/// the cycle number, which wakes the in-flight cycle and makes it return
/// `Cancelled` without touching state.
pub struct DecisionSession {
    engine: PolicyEngine,
    directory: Arc<dyn IdentityDirectory>,
    prompt: Arc<dyn EscortPrompt>,
    emitter: EventEmitter,
    clock: Clock,
    inner: Mutex<Inner>,
    status: watch::Sender<Status>,
}

impl DecisionSession {
    pub fn new(
        engine: PolicyEngine,
        directory: Arc<dyn IdentityDirectory>,
        prompt: Arc<dyn EscortPrompt>,
        emitter: EventEmitter,
    ) -> Self {
        let (status, _) = watch::channel(Status {
            cycle: 0,
            state: SessionState::Idle,
        });
        Self {
            engine,
            directory,
            prompt,
            emitter,
            clock: Arc::new(local_today),
            inner: Mutex::new(Inner {
                cycle: 0,
                state: SessionState::Idle,
                verdict: None,
                awaiting: None,
            }),
            status,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn lock(&self) -> SessionResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| SessionError::Internal("lock poisoned".into()))
    }

    fn publish(&self, inner: &Inner) {
        self.status.send_replace(Status {
            cycle: inner.cycle,
            state: inner.state,
        });
    }

    /// The last published state. Read from the status channel, so it stays
    /// accurate even if the state lock is poisoned.
    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    /// The current verdict. `None` before a scan, while a cycle runs, and
    /// after a reset. Use [`snapshot`](Self::snapshot) to see lock failures.
    pub fn verdict(&self) -> Option<Verdict> {
        match self.lock() {
            Ok(inner) => inner.verdict.clone(),
            Err(e) => {
                warn!(error = %e, "session state unavailable");
                None
            }
        }
    }

    pub fn snapshot(&self) -> SessionResult<SessionSnapshot> {
        let inner = self.lock()?;
        Ok(SessionSnapshot {
            state: inner.state,
            verdict: inner.verdict.clone(),
            awaiting: inner.awaiting.clone(),
        })
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    /// Discard the verdict and any in-flight cycle; back to ready-to-scan.
    pub fn reset(&self) -> SessionResult<()> {
        let mut inner = self.lock()?;
        let was = inner.state;
        inner.cycle += 1;
        inner.state = SessionState::Idle;
        inner.verdict = None;
        inner.awaiting = None;
        self.publish(&inner);
        debug!(cycle = inner.cycle, from = ?was, "session reset");
        Ok(())
    }

    /// Run one cycle for a scanned card.
    pub async fn scan(&self, card_id: CardId) -> SessionResult<Verdict> {
        let (cycle, rx) = self.begin_cycle()?;
        info!(card = %card_id, cycle, "card scanned");

        let lookup = tokio::select! {
            result = self.directory.resolve(&card_id) => result,
            _ = cancelled(rx.clone(), cycle) => return Err(SessionError::Cancelled),
        };

        match lookup {
            Err(e) => {
                warn!(card = %card_id, error = %e, "identity lookup failed");
                self.abort(cycle)?;
                Err(SessionError::Unreachable(e.to_string()))
            }
            Ok(Lookup::NotFound) => {
                info!(card = %card_id, "card not registered");
                let verdict = self.engine.unknown_card(card_id.clone());
                self.finalize(cycle, verdict, Some(card_id))
            }
            Ok(Lookup::Found(identity)) => self.decide(cycle, rx, identity, Some(card_id)).await,
        }
    }

    /// Run one cycle for an identity chosen by the operator, bypassing the
    /// resolver.
    pub async fn evaluate_manual(&self, identity: IdentityRecord) -> SessionResult<Verdict> {
        let (cycle, rx) = self.begin_cycle()?;
        info!(subject = %identity.display_name(), cycle, "manual selection");
        let card_id = identity.card_id.clone();
        self.decide(cycle, rx, identity, card_id).await
    }

    fn begin_cycle(&self) -> SessionResult<(u64, watch::Receiver<Status>)> {
        let mut inner = self.lock()?;
        if inner.state.is_in_flight() {
            return Err(SessionError::Busy);
        }
        inner.cycle += 1;
        inner.state = SessionState::Scanning;
        inner.verdict = None;
        inner.awaiting = None;
        self.publish(&inner);
        Ok((inner.cycle, self.status.subscribe()))
    }

    async fn decide(
        &self,
        cycle: u64,
        rx: watch::Receiver<Status>,
        identity: IdentityRecord,
        card_id: Option<CardId>,
    ) -> SessionResult<Verdict> {
        let today = (self.clock)();
        let challenge = match self.engine.evaluate(identity, today) {
            Evaluation::Resolved(verdict) => return self.finalize(cycle, verdict, card_id),
            Evaluation::AwaitingEscort(challenge) => challenge,
        };

        let subject = challenge.subject().clone();
        {
            let mut inner = self.lock()?;
            if inner.cycle != cycle {
                challenge.cancel();
                return Err(SessionError::Cancelled);
            }
            inner.state = SessionState::AwaitingEscort;
            inner.awaiting = Some(subject.clone());
            self.publish(&inner);
        }
        info!(subject = %subject.display_name(), cycle, "awaiting escort answer");

        let answer = tokio::select! {
            answer = self.prompt.ask(&subject) => answer,
            _ = cancelled(rx, cycle) => {
                challenge.cancel();
                return Err(SessionError::Cancelled);
            }
        };

        match answer {
            Ok(answer) => self.finalize(cycle, challenge.resolve(answer), card_id),
            Err(e) => {
                challenge.cancel();
                warn!(error = %e, "escort prompt failed");
                self.abort(cycle)?;
                Err(SessionError::Prompt(e.to_string()))
            }
        }
    }

    /// Install the verdict if this cycle is still current, then emit.
    fn finalize(
        &self,
        cycle: u64,
        verdict: Verdict,
        card_id: Option<CardId>,
    ) -> SessionResult<Verdict> {
        {
            let mut inner = self.lock()?;
            if inner.cycle != cycle {
                return Err(SessionError::Cancelled);
            }
            inner.state = SessionState::Resolved;
            inner.verdict = Some(verdict.clone());
            inner.awaiting = None;
            self.publish(&inner);
        }

        info!(
            subject = %verdict.subject.display_name(),
            reason = %verdict.reason,
            severity = %verdict.severity,
            authorized = verdict.authorized,
            "verdict"
        );
        self.emitter.emit(&verdict, verdict.subject.role(), card_id);
        Ok(verdict)
    }

    /// Drop back to `Idle` with no verdict if this cycle is still current.
    fn abort(&self, cycle: u64) -> SessionResult<()> {
        let mut inner = self.lock()?;
        if inner.cycle != cycle {
            return Err(SessionError::Cancelled);
        }
        inner.state = SessionState::Idle;
        inner.verdict = None;
        inner.awaiting = None;
        self.publish(&inner);
        Ok(())
    }
}

/// Completes once the session has moved past `cycle`.
async fn cancelled(mut rx: watch::Receiver<Status>, cycle: u64) {
    loop {
        if rx.borrow_and_update().cycle != cycle {
            return;
        }
        if rx.changed().await.is_err() {
            // Session dropped; nothing can cancel us any more
            std::future::pending::<()>().await;
        }
    }
}
