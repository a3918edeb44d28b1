//! Escort question registry.
//!
//! `PendingEscortPrompt` parks the "is the minor accompanied?" question until
//! the presentation layer answers it. Only one question exists at a time.
//! Dropping the asking future (a session reset) withdraws the question.

use async_trait::async_trait;
use gatepass_core::{CoreError, CoreResult, EscortAnswer, EscortPrompt, IdentityRecord, Timestamp};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::error::{SessionError, SessionResult};

/// The question currently waiting for an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingQuestion {
    pub subject: IdentityRecord,
    pub asked_at: Timestamp,
}

struct Parked {
    id: u64,
    question: PendingQuestion,
    reply: oneshot::Sender<EscortAnswer>,
}

pub struct PendingEscortPrompt {
    slot: Mutex<Option<Parked>>,
    next_id: AtomicU64,
    parked: watch::Sender<bool>,
}

impl PendingEscortPrompt {
    pub fn new() -> Self {
        let (parked, _) = watch::channel(false);
        Self {
            slot: Mutex::new(None),
            next_id: AtomicU64::new(1),
            parked,
        }
    }

    /// Answer the parked question.
    pub fn answer(&self, accompanied: bool) -> SessionResult<()> {
        let parked = self
            .slot
            .lock()
            .map_err(|_| SessionError::Internal("lock poisoned".into()))?
            .take()
            .ok_or(SessionError::NoPendingQuestion)?;
        self.parked.send_replace(false);

        debug!(
            subject = %parked.question.subject.display_name(),
            accompanied,
            "escort question answered"
        );
        // The asker may have been cancelled between take() and send()
        parked
            .reply
            .send(EscortAnswer::from(accompanied))
            .map_err(|_| SessionError::NoPendingQuestion)
    }

    pub fn pending(&self) -> Option<PendingQuestion> {
        self.slot
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|p| p.question.clone()))
    }

    pub fn has_pending(&self) -> bool {
        self.pending().is_some()
    }

    /// Completes once a question is parked.
    pub async fn question_parked(&self) {
        let mut rx = self.parked.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn withdraw(&self, id: u64) {
        if let Ok(mut slot) = self.slot.lock() {
            if slot.as_ref().map(|p| p.id) == Some(id) {
                slot.take();
                self.parked.send_replace(false);
                debug!("escort question withdrawn");
            }
        }
    }
}

impl Default for PendingEscortPrompt {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the parked question when the asking future goes away.
struct WithdrawOnDrop<'a> {
    prompt: &'a PendingEscortPrompt,
    id: u64,
}

impl Drop for WithdrawOnDrop<'_> {
    fn drop(&mut self) {
        self.prompt.withdraw(self.id);
    }
}

#[async_trait]
impl EscortPrompt for PendingEscortPrompt {
    async fn ask(&self, subject: &IdentityRecord) -> CoreResult<EscortAnswer> {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        {
            let mut slot = self
                .slot
                .lock()
                .map_err(|_| CoreError::PromptClosed("lock poisoned".into()))?;
            *slot = Some(Parked {
                id,
                question: PendingQuestion {
                    subject: subject.clone(),
                    asked_at: Timestamp::now(),
                },
                reply: tx,
            });
            self.parked.send_replace(true);
        }
        let _guard = WithdrawOnDrop { prompt: self, id };
        debug!(subject = %subject.display_name(), "escort question parked");

        rx.await
            .map_err(|_| CoreError::PromptClosed("question withdrawn".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatepass_core::PersonRole;
    use std::sync::Arc;
    use std::time::Duration;

    fn minor() -> IdentityRecord {
        IdentityRecord::new("Leo", PersonRole::Student).with_surname("Martín")
    }

    async fn wait_until_pending(prompt: &PendingEscortPrompt) {
        tokio::time::timeout(Duration::from_secs(5), prompt.question_parked())
            .await
            .unwrap();
        assert!(prompt.has_pending());
    }

    #[test]
    fn test_answer_without_question() {
        let prompt = PendingEscortPrompt::new();
        assert_eq!(prompt.answer(true), Err(SessionError::NoPendingQuestion));
    }

    #[tokio::test]
    async fn test_answer_reaches_asker() {
        let prompt = Arc::new(PendingEscortPrompt::new());
        let asker = {
            let prompt = prompt.clone();
            tokio::spawn(async move { prompt.ask(&minor()).await })
        };

        wait_until_pending(&prompt).await;
        assert_eq!(
            prompt.pending().unwrap().subject.display_name(),
            "Leo Martín"
        );
        prompt.answer(false).unwrap();

        assert_eq!(asker.await.unwrap().unwrap(), EscortAnswer::Unaccompanied);
        assert!(!prompt.has_pending());
        // A question can only be answered once
        assert_eq!(prompt.answer(true), Err(SessionError::NoPendingQuestion));
    }

    #[tokio::test]
    async fn test_dropping_asker_withdraws_question() {
        let prompt = Arc::new(PendingEscortPrompt::new());
        let asker = {
            let prompt = prompt.clone();
            tokio::spawn(async move { prompt.ask(&minor()).await })
        };

        wait_until_pending(&prompt).await;
        asker.abort();
        let _ = asker.await;

        assert!(!prompt.has_pending());
        assert_eq!(prompt.answer(true), Err(SessionError::NoPendingQuestion));
    }
}
