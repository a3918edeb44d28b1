use chrono::NaiveDate;
use gatepass_core::{CardId, EscortAnswer, IdentityRecord, ReasonCode, Timestamp};
use tracing::{debug, warn};

use crate::classifier::classify;
use crate::error::PolicyResult;
use crate::types::{Eligibility, PolicyConfig, Subject, Verdict};

// ---------------------------------------------------------------------------
// Evaluation — first exit of the state machine
// ---------------------------------------------------------------------------

/// Result of evaluating a resolved identity.
///
/// `Resolved` is terminal. `AwaitingEscort` carries the only transition left:
/// answering the challenge.
#[derive(Debug)]
pub enum Evaluation {
    Resolved(Verdict),
    AwaitingEscort(EscortChallenge),
}

// ---------------------------------------------------------------------------
// EscortChallenge — move-only pending human decision
// ---------------------------------------------------------------------------

/// Pending "is the minor accompanied by an adult?" decision.
///
/// Consumed on resolution, so one challenge can never produce two verdicts.
/// There is no deadline: the challenge waits until answered or cancelled.
pub struct EscortChallenge {
    subject: IdentityRecord,
    eligibility: Eligibility,
    issued_at: Timestamp,
    settled: bool,
}

impl std::fmt::Debug for EscortChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscortChallenge")
            .field("subject", &self.subject.display_name())
            .field("eligibility", &self.eligibility)
            .field("issued_at", &self.issued_at)
            .field("settled", &self.settled)
            .finish()
    }
}

impl EscortChallenge {
    fn new(subject: IdentityRecord, eligibility: Eligibility) -> Self {
        Self {
            subject,
            eligibility,
            issued_at: Timestamp::now(),
            settled: false,
        }
    }

    pub fn subject(&self) -> &IdentityRecord {
        &self.subject
    }

    pub fn eligibility(&self) -> Eligibility {
        self.eligibility
    }

    pub fn issued_at(&self) -> Timestamp {
        self.issued_at
    }

    /// Resolve with the operator's answer. An accompanied minor leaves with
    /// caution; an unaccompanied one is denied.
    pub fn resolve(mut self, answer: EscortAnswer) -> Verdict {
        self.settled = true;
        let reason = match answer {
            EscortAnswer::Accompanied => ReasonCode::EscortedMinor,
            EscortAnswer::Unaccompanied => ReasonCode::DeniedNoEscort,
        };
        debug!(
            subject = %self.subject.display_name(),
            reason = %reason,
            "escort challenge resolved"
        );
        // Clone since we have a Drop impl and can't move out of self
        Verdict::from_reason(
            reason,
            Subject::Known {
                identity: self.subject.clone(),
            },
        )
    }

    /// Abandon the challenge without a verdict.
    pub fn cancel(mut self) {
        self.settled = true;
        debug!(
            subject = %self.subject.display_name(),
            "escort challenge cancelled"
        );
    }
}

impl Drop for EscortChallenge {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                subject = %self.subject.display_name(),
                "EscortChallenge dropped without resolution"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// PolicyEngine
// ---------------------------------------------------------------------------

/// Exit authorization policy.
///
/// Rules are applied in strict order, first match wins:
/// 1. adult → authorized, success
/// 2. minor with school transport → authorized, caution
/// 3. minor without transport → escort challenge
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    config: PolicyConfig,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> PolicyResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Evaluate a resolved identity as of `today`.
    pub fn evaluate(&self, identity: IdentityRecord, today: NaiveDate) -> Evaluation {
        let eligibility = classify(&identity, today, self.config.adult_age);
        debug!(
            subject = %identity.display_name(),
            is_adult = eligibility.is_adult,
            has_transport = eligibility.has_transport,
            "identity classified"
        );

        if eligibility.is_adult {
            return Evaluation::Resolved(Verdict::from_reason(
                ReasonCode::Adult,
                Subject::Known { identity },
            ));
        }

        if eligibility.has_transport {
            return Evaluation::Resolved(Verdict::from_reason(
                ReasonCode::MinorWithTransport,
                Subject::Known { identity },
            ));
        }

        Evaluation::AwaitingEscort(EscortChallenge::new(identity, eligibility))
    }

    /// Terminal denial for a card the directory does not know. Never
    /// classifies and never asks for an escort.
    pub fn unknown_card(&self, card_id: CardId) -> Verdict {
        Verdict::from_reason(ReasonCode::UnknownCard, Subject::Unknown { card_id })
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self {
            config: PolicyConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatepass_core::{PersonRole, Severity};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn student(birth: NaiveDate, transport: bool) -> IdentityRecord {
        IdentityRecord::new("Marta", PersonRole::Student)
            .with_surname("Gil")
            .with_birth_date(birth)
            .with_transport(transport)
    }

    fn expect_resolved(evaluation: Evaluation) -> Verdict {
        match evaluation {
            Evaluation::Resolved(v) => v,
            Evaluation::AwaitingEscort(c) => {
                c.cancel();
                panic!("expected a resolved verdict");
            }
        }
    }

    fn expect_challenge(evaluation: Evaluation) -> EscortChallenge {
        match evaluation {
            Evaluation::AwaitingEscort(c) => c,
            Evaluation::Resolved(v) => panic!("expected escort challenge, got {:?}", v.reason),
        }
    }

    #[test]
    fn test_adult_is_authorized_regardless_of_transport() {
        let engine = PolicyEngine::default();
        for transport in [true, false] {
            let verdict =
                expect_resolved(engine.evaluate(student(date(2000, 1, 1), transport), date(2024, 6, 1)));
            assert!(verdict.authorized);
            assert_eq!(verdict.severity, Severity::Success);
            assert_eq!(verdict.reason, ReasonCode::Adult);
        }
    }

    #[test]
    fn test_minor_with_transport_is_authorized_with_caution() {
        let engine = PolicyEngine::default();
        let verdict =
            expect_resolved(engine.evaluate(student(date(2012, 6, 1), true), date(2024, 6, 1)));
        assert!(verdict.authorized);
        assert_eq!(verdict.severity, Severity::Caution);
        assert_eq!(verdict.reason, ReasonCode::MinorWithTransport);
    }

    #[test]
    fn test_minor_without_transport_awaits_escort() {
        let engine = PolicyEngine::default();
        let challenge =
            expect_challenge(engine.evaluate(student(date(2012, 6, 1), false), date(2024, 6, 1)));
        assert_eq!(challenge.subject().display_name(), "Marta Gil");
        assert!(!challenge.eligibility().is_adult);
        assert!(!challenge.eligibility().has_transport);
        challenge.cancel();
    }

    #[test]
    fn test_unaccompanied_minor_is_denied() {
        let engine = PolicyEngine::default();
        let challenge =
            expect_challenge(engine.evaluate(student(date(2012, 6, 1), false), date(2024, 6, 1)));
        let verdict = challenge.resolve(EscortAnswer::Unaccompanied);
        assert!(!verdict.authorized);
        assert_eq!(verdict.severity, Severity::Error);
        assert_eq!(verdict.reason, ReasonCode::DeniedNoEscort);
    }

    #[test]
    fn test_escorted_minor_is_authorized_with_caution() {
        let engine = PolicyEngine::default();
        let challenge =
            expect_challenge(engine.evaluate(student(date(2012, 6, 1), false), date(2024, 6, 1)));
        let verdict = challenge.resolve(EscortAnswer::Accompanied);
        assert!(verdict.authorized);
        assert_eq!(verdict.severity, Severity::Caution);
        assert_eq!(verdict.reason, ReasonCode::EscortedMinor);
        assert_eq!(verdict.subject.display_name(), "Marta Gil");
    }

    #[test]
    fn test_missing_birth_date_requires_escort_without_transport() {
        let engine = PolicyEngine::default();
        let record = IdentityRecord::new("Sin Fecha", PersonRole::Student);
        let challenge = expect_challenge(engine.evaluate(record, date(2024, 6, 1)));
        challenge.cancel();
    }

    #[test]
    fn test_unknown_card_denial() {
        let engine = PolicyEngine::default();
        let verdict = engine.unknown_card(CardId::new("UNKNOWN1"));
        assert!(!verdict.authorized);
        assert_eq!(verdict.severity, Severity::Error);
        assert_eq!(verdict.reason, ReasonCode::UnknownCard);
        assert_eq!(
            verdict.subject,
            Subject::Unknown {
                card_id: CardId::new("UNKNOWN1")
            }
        );
    }

    #[test]
    fn test_engine_rejects_invalid_config() {
        assert!(PolicyEngine::new(PolicyConfig { adult_age: 0 }).is_err());
        let engine = PolicyEngine::new(PolicyConfig { adult_age: 21 }).unwrap();
        assert_eq!(engine.config().adult_age, 21);
    }

    #[test]
    fn test_adult_age_threshold_is_configurable() {
        let engine = PolicyEngine::new(PolicyConfig { adult_age: 21 }).unwrap();
        let challenge =
            expect_challenge(engine.evaluate(student(date(2004, 6, 1), false), date(2024, 6, 1)));
        challenge.cancel();
    }
}
