use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{CoreError, CoreResult};

// ---------------------------------------------------------------------------
// Timestamp — canonical time representation (seconds + nanoseconds)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds_since_epoch: u64,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        chrono::Utc::now().into()
    }

    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            seconds_since_epoch: seconds,
            nanoseconds: 0,
        }
    }

    pub fn to_rfc3339(&self) -> String {
        let dt =
            chrono::DateTime::from_timestamp(self.seconds_since_epoch as i64, self.nanoseconds);
        dt.map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "invalid".to_string())
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Timestamp {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            seconds_since_epoch: dt.timestamp().max(0) as u64,
            nanoseconds: dt.timestamp_subsec_nanos(),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed identifiers — prevent stringly-typed confusion
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(CardId, "Identifier read from a proximity card.");
define_id!(IdentityId, "Stable directory identifier of a person.");
define_id!(EventId, "Unique identifier of an audit event.");

impl EventId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

// ---------------------------------------------------------------------------
// PersonRole — who a record describes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonRole {
    Student,
    Staff,
}

impl PersonRole {
    pub fn as_str(self) -> &'static str {
        match self {
            PersonRole::Student => "student",
            PersonRole::Staff => "staff",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "student" => Some(PersonRole::Student),
            "staff" => Some(PersonRole::Staff),
            _ => None,
        }
    }
}

impl fmt::Display for PersonRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Severity / ReasonCode — closed verdict vocabulary
// ---------------------------------------------------------------------------

/// Presentation-facing classification of a verdict. Independent of the
/// boolean outcome: an escorted minor is authorized with `Caution`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Caution,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Success => write!(f, "success"),
            Severity::Caution => write!(f, "caution"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Why a verdict was reached. Exhaustive so that adding a reason forces a
/// review of every outcome mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Adult,
    MinorWithTransport,
    EscortedMinor,
    DeniedNoEscort,
    UnknownCard,
}

impl ReasonCode {
    /// The `(authorized, severity)` pair every verdict with this reason carries.
    pub fn outcome(self) -> (bool, Severity) {
        match self {
            ReasonCode::Adult => (true, Severity::Success),
            ReasonCode::MinorWithTransport => (true, Severity::Caution),
            ReasonCode::EscortedMinor => (true, Severity::Caution),
            ReasonCode::DeniedNoEscort => (false, Severity::Error),
            ReasonCode::UnknownCard => (false, Severity::Error),
        }
    }

    /// Status line shown to the gate operator.
    pub fn status_label(self) -> &'static str {
        match self {
            ReasonCode::Adult => "early exit",
            ReasonCode::MinorWithTransport => "school transport",
            ReasonCode::EscortedMinor => "escorted exit",
            ReasonCode::DeniedNoEscort => "denied: no escort",
            ReasonCode::UnknownCard => "card not registered",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasonCode::Adult => write!(f, "ADULT"),
            ReasonCode::MinorWithTransport => write!(f, "MINOR_WITH_TRANSPORT"),
            ReasonCode::EscortedMinor => write!(f, "ESCORTED_MINOR"),
            ReasonCode::DeniedNoEscort => write!(f, "DENIED_NO_ESCORT"),
            ReasonCode::UnknownCard => write!(f, "UNKNOWN_CARD"),
        }
    }
}

// ---------------------------------------------------------------------------
// EscortAnswer — the operator's answer to "is the minor accompanied?"
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscortAnswer {
    Accompanied,
    Unaccompanied,
}

impl From<bool> for EscortAnswer {
    fn from(accompanied: bool) -> Self {
        if accompanied {
            EscortAnswer::Accompanied
        } else {
            EscortAnswer::Unaccompanied
        }
    }
}

// ---------------------------------------------------------------------------
// Photo — base64-encoded image as delivered by the directory
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Photo(String);

impl Photo {
    pub fn from_base64(encoded: impl Into<String>) -> CoreResult<Self> {
        let encoded = encoded.into();
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(|_| CoreError::InvalidPhoto)?;
        Ok(Self(encoded))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(STANDARD.encode(bytes))
    }

    pub fn as_base64(&self) -> &str {
        &self.0
    }

    pub fn decode(&self) -> CoreResult<Vec<u8>> {
        STANDARD
            .decode(self.0.as_bytes())
            .map_err(|_| CoreError::InvalidPhoto)
    }
}

impl fmt::Debug for Photo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Photo({} base64 chars)", self.0.len())
    }
}

// ---------------------------------------------------------------------------
// IdentityRecord — one person known to the directory
// ---------------------------------------------------------------------------

/// Sentinel course for records the directory left without one.
pub const UNASSIGNED_COURSE: &str = "unassigned";

/// Normalize a raw course/role label. Absent or blank values collapse to
/// [`UNASSIGNED_COURSE`].
pub fn normalize_course(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => UNASSIGNED_COURSE.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    #[serde(default)]
    pub id: Option<IdentityId>,
    pub name: String,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default = "unassigned_course", deserialize_with = "deserialize_course")]
    pub course_or_role: String,
    #[serde(default)]
    pub photo: Option<Photo>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub has_transport_eligibility: bool,
    #[serde(default)]
    pub card_id: Option<CardId>,
    pub role: PersonRole,
}

fn unassigned_course() -> String {
    UNASSIGNED_COURSE.to_string()
}

/// Directories send `false` or `null` for a person with no course.
fn deserialize_course<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawCourse {
        Label(String),
        Flag(bool),
    }

    Ok(match Option::<RawCourse>::deserialize(deserializer)? {
        Some(RawCourse::Label(label)) => normalize_course(Some(&label)),
        Some(RawCourse::Flag(_)) | None => normalize_course(None),
    })
}

impl IdentityRecord {
    pub fn new(name: impl Into<String>, role: PersonRole) -> Self {
        Self {
            id: None,
            name: name.into(),
            surname: None,
            course_or_role: unassigned_course(),
            photo: None,
            birth_date: None,
            has_transport_eligibility: false,
            card_id: None,
            role,
        }
    }

    pub fn with_id(mut self, id: impl Into<IdentityId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_surname(mut self, surname: impl Into<String>) -> Self {
        self.surname = Some(surname.into());
        self
    }

    pub fn with_course(mut self, course: &str) -> Self {
        self.course_or_role = normalize_course(Some(course));
        self
    }

    pub fn with_birth_date(mut self, birth_date: NaiveDate) -> Self {
        self.birth_date = Some(birth_date);
        self
    }

    pub fn with_transport(mut self, eligible: bool) -> Self {
        self.has_transport_eligibility = eligible;
        self
    }

    pub fn with_card(mut self, card_id: impl Into<CardId>) -> Self {
        self.card_id = Some(card_id.into());
        self
    }

    pub fn with_photo(mut self, photo: Photo) -> Self {
        self.photo = Some(photo);
        self
    }

    /// `name` and `surname` joined by a single space; surname is optional.
    pub fn display_name(&self) -> String {
        match self.surname.as_deref().map(str::trim) {
            Some(surname) if !surname.is_empty() => format!("{} {}", self.name, surname),
            _ => self.name.clone(),
        }
    }

    /// True while no card identifier has been bound to this record.
    pub fn is_pending_binding(&self) -> bool {
        self.card_id.is_none()
    }
}

// ---------------------------------------------------------------------------
// AuditEvent — one finalized decision handed to the registration sink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: EventId,
    pub card_id: Option<CardId>,
    /// `None` for unknown cards.
    pub role: Option<PersonRole>,
    pub subject_name: String,
    pub authorized: bool,
    pub severity: Severity,
    pub reason: ReasonCode,
    pub status: String,
    pub recorded_at: Timestamp,
}

// ---------------------------------------------------------------------------
// AuditHash — SHA-256 link in the audit chain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuditHash(pub [u8; 32]);

impl AuditHash {
    /// Hash `payload` chained onto `previous` (genesis entries have none).
    pub fn chain(previous: Option<&AuditHash>, payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        if let Some(prev) = previous {
            hasher.update(prev.0);
        }
        hasher.update(payload);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }
}

impl fmt::Display for AuditHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ordering() {
        let t1 = Timestamp::from_seconds(100);
        let t2 = Timestamp::from_seconds(200);
        assert!(t1 < t2);
    }

    #[test]
    fn test_timestamp_rfc3339() {
        let t = Timestamp::from_seconds(1_700_000_000);
        assert!(t.to_rfc3339().contains("2023"));
    }

    #[test]
    fn test_typed_ids_serialize_transparently() {
        let card = CardId::new("04A1B2C3");
        assert_eq!(serde_json::to_string(&card).unwrap(), "\"04A1B2C3\"");
        assert_eq!(card.to_string(), "04A1B2C3");
    }

    #[test]
    fn test_event_ids_are_unique() {
        assert_ne!(EventId::generate(), EventId::generate());
    }

    #[test]
    fn test_reason_outcomes() {
        assert_eq!(ReasonCode::Adult.outcome(), (true, Severity::Success));
        assert_eq!(
            ReasonCode::MinorWithTransport.outcome(),
            (true, Severity::Caution)
        );
        assert_eq!(ReasonCode::EscortedMinor.outcome(), (true, Severity::Caution));
        assert_eq!(ReasonCode::DeniedNoEscort.outcome(), (false, Severity::Error));
        assert_eq!(ReasonCode::UnknownCard.outcome(), (false, Severity::Error));
    }

    #[test]
    fn test_reason_code_wire_format() {
        let json = serde_json::to_string(&ReasonCode::MinorWithTransport).unwrap();
        assert_eq!(json, "\"MINOR_WITH_TRANSPORT\"");
        assert_eq!(ReasonCode::DeniedNoEscort.to_string(), "DENIED_NO_ESCORT");
    }

    #[test]
    fn test_escort_answer_from_bool() {
        assert_eq!(EscortAnswer::from(true), EscortAnswer::Accompanied);
        assert_eq!(EscortAnswer::from(false), EscortAnswer::Unaccompanied);
    }

    #[test]
    fn test_photo_rejects_invalid_base64() {
        assert_eq!(
            Photo::from_base64("***not base64***").unwrap_err(),
            CoreError::InvalidPhoto
        );
        let photo = Photo::from_bytes(&[0x89, 0x50, 0x4e, 0x47]);
        assert_eq!(photo.decode().unwrap(), vec![0x89, 0x50, 0x4e, 0x47]);
        assert!(!format!("{:?}", photo).contains(photo.as_base64()));
    }

    #[test]
    fn test_display_name() {
        let full = IdentityRecord::new("Ana", PersonRole::Student).with_surname("Ruiz");
        assert_eq!(full.display_name(), "Ana Ruiz");
        let single = IdentityRecord::new("Ana", PersonRole::Student);
        assert_eq!(single.display_name(), "Ana");
    }

    #[test]
    fn test_course_normalization() {
        assert_eq!(normalize_course(None), UNASSIGNED_COURSE);
        assert_eq!(normalize_course(Some("   ")), UNASSIGNED_COURSE);
        assert_eq!(normalize_course(Some("2º ESO")), "2º ESO");
    }

    #[test]
    fn test_identity_defaults_when_fields_absent() {
        let record: IdentityRecord =
            serde_json::from_str(r#"{"name":"Luis","role":"staff"}"#).unwrap();
        assert_eq!(record.course_or_role, UNASSIGNED_COURSE);
        assert!(!record.has_transport_eligibility);
        assert!(record.birth_date.is_none());
        assert!(record.is_pending_binding());
    }

    #[test]
    fn test_identity_course_false_null_or_blank_is_unassigned() {
        for raw in ["false", "null", "\"\"", "\"  \""] {
            let json = format!(r#"{{"name":"Luis","role":"student","course_or_role":{}}}"#, raw);
            let record: IdentityRecord = serde_json::from_str(&json).unwrap();
            assert_eq!(record.course_or_role, UNASSIGNED_COURSE, "input {}", raw);
        }

        let record: IdentityRecord = serde_json::from_str(
            r#"{"name":"Luis","role":"student","course_or_role":" 4º ESO "}"#,
        )
        .unwrap();
        assert_eq!(record.course_or_role, "4º ESO");
    }

    #[test]
    fn test_audit_hash_chain_depends_on_previous() {
        let genesis = AuditHash::chain(None, b"first");
        let a = AuditHash::chain(Some(&genesis), b"second");
        let b = AuditHash::chain(None, b"second");
        assert_ne!(a, b);
        assert_eq!(genesis.to_string().len(), 64);
    }
}
