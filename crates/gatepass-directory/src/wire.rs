//! JSON bodies exchanged with a gatepass directory server.

use gatepass_core::{
    AuditEvent, CardId, EventId, IdentityRecord, PersonRole, ReasonCode, Severity, Timestamp,
};
use serde::{Deserialize, Serialize};

pub const VERIFY_CARD_PATH: &str = "/api/verify-card";
pub const REGISTER_PATH: &str = "/api/register";

/// Message returned for a card the directory does not know.
pub const CARD_NOT_REGISTERED: &str = "card not registered";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyCardRequest {
    pub card_id: CardId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyCardResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VerifyCardResponse {
    pub fn found(identity: IdentityRecord) -> Self {
        Self {
            success: true,
            identity: Some(identity),
            message: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            success: false,
            identity: None,
            message: Some(CARD_NOT_REGISTERED.to_string()),
        }
    }
}

/// One finalized decision as posted to `/api/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub event_id: EventId,
    #[serde(rename = "uid", default)]
    pub card_id: Option<CardId>,
    #[serde(rename = "usr_type", default)]
    pub role: Option<PersonRole>,
    pub status: String,
    pub subject_name: String,
    pub authorized: bool,
    pub severity: Severity,
    pub reason: ReasonCode,
    pub recorded_at: Timestamp,
}

impl From<&AuditEvent> for RegisterRequest {
    fn from(event: &AuditEvent) -> Self {
        Self {
            event_id: event.event_id.clone(),
            card_id: event.card_id.clone(),
            role: event.role,
            status: event.status.clone(),
            subject_name: event.subject_name.clone(),
            authorized: event.authorized,
            severity: event.severity,
            reason: event.reason,
            recorded_at: event.recorded_at,
        }
    }
}

impl From<RegisterRequest> for AuditEvent {
    fn from(req: RegisterRequest) -> Self {
        Self {
            event_id: req.event_id,
            card_id: req.card_id,
            role: req.role,
            subject_name: req.subject_name,
            authorized: req.authorized,
            severity: req.severity,
            reason: req.reason,
            status: req.status,
            recorded_at: req.recorded_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
