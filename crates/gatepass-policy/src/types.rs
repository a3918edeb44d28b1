use gatepass_core::{CardId, IdentityRecord, PersonRole, ReasonCode, Severity, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, PolicyResult};

// ---------------------------------------------------------------------------
// PolicyConfig
// ---------------------------------------------------------------------------

pub const DEFAULT_ADULT_AGE: u32 = 18;
const MAX_ADULT_AGE: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Whole years at which a person may leave without further checks.
    #[serde(default = "default_adult_age")]
    pub adult_age: u32,
}

fn default_adult_age() -> u32 {
    DEFAULT_ADULT_AGE
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            adult_age: DEFAULT_ADULT_AGE,
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> PolicyResult<()> {
        if self.adult_age == 0 || self.adult_age > MAX_ADULT_AGE {
            return Err(PolicyError::InvalidAdultAge {
                got: self.adult_age,
                max: MAX_ADULT_AGE,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Eligibility — classifier output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub is_adult: bool,
    pub has_transport: bool,
}

// ---------------------------------------------------------------------------
// Subject — who a verdict concerns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Subject {
    Known { identity: IdentityRecord },
    /// Placeholder for a card the directory does not know.
    Unknown { card_id: CardId },
}

impl Subject {
    pub fn display_name(&self) -> String {
        match self {
            Subject::Known { identity } => identity.display_name(),
            Subject::Unknown { .. } => "Unknown".to_string(),
        }
    }

    /// Second line under the name: course for known people, the raw card
    /// identifier for unknown ones.
    pub fn detail_line(&self) -> String {
        match self {
            Subject::Known { identity } => identity.course_or_role.clone(),
            Subject::Unknown { card_id } => format!("UID: {}", card_id),
        }
    }

    pub fn role(&self) -> Option<PersonRole> {
        match self {
            Subject::Known { identity } => Some(identity.role),
            Subject::Unknown { .. } => None,
        }
    }

    pub fn identity(&self) -> Option<&IdentityRecord> {
        match self {
            Subject::Known { identity } => Some(identity),
            Subject::Unknown { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Verdict — the engine's output for one cycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub authorized: bool,
    pub severity: Severity,
    pub reason: ReasonCode,
    pub subject: Subject,
    pub decided_at: Timestamp,
}

impl Verdict {
    /// Build a verdict whose outcome is fixed by its reason code.
    pub(crate) fn from_reason(reason: ReasonCode, subject: Subject) -> Self {
        let (authorized, severity) = reason.outcome();
        Self {
            authorized,
            severity,
            reason,
            subject,
            decided_at: Timestamp::now(),
        }
    }

    pub fn status_label(&self) -> &'static str {
        self.reason.status_label()
    }
}
