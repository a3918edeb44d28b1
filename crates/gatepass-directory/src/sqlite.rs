use async_trait::async_trait;
use chrono::NaiveDate;
use gatepass_core::{
    normalize_course, AuditEvent, CardId, CoreResult, IdentityDirectory, IdentityId,
    IdentityRecord, Lookup, PersonRole, Photo, RegistrationSink, UNASSIGNED_COURSE,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DirectoryError, DirectoryResult};

/// Course label for staff records that carry neither a course nor an email.
pub const STAFF_DEFAULT_LABEL: &str = "teaching staff";

const BIRTH_DATE_FORMAT: &str = "%Y-%m-%d";

const IDENTITY_COLUMNS: &str =
    "identity_id, name, surname, course, email, photo, birth_date, can_bus, card_id, role";

/// Persistent identity directory and registration log.
///
/// A card identifier belongs to at most one identity (`UNIQUE card_id`).
/// Every lookup reads the table; nothing is cached between calls.
pub struct SqliteDirectory {
    conn: Mutex<Connection>,
}

impl SqliteDirectory {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &str) -> DirectoryResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| DirectoryError::Storage(format!("failed to open database: {}", e)))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS identities (
                identity_id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                surname TEXT,
                course TEXT,
                email TEXT,
                photo TEXT,
                birth_date TEXT,
                can_bus INTEGER NOT NULL DEFAULT 0,
                card_id TEXT UNIQUE,
                role TEXT NOT NULL,
                created_at TEXT DEFAULT (datetime('now')),
                updated_at TEXT DEFAULT (datetime('now'))
            );
            CREATE TABLE IF NOT EXISTS registrations (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL UNIQUE,
                card_id TEXT,
                role TEXT,
                authorized INTEGER NOT NULL,
                reason TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT DEFAULT (datetime('now'))
            );",
        )
        .map_err(|e| DirectoryError::Storage(format!("failed to create tables: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> DirectoryResult<Self> {
        Self::open(":memory:")
    }

    fn lock(&self) -> DirectoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DirectoryError::Storage(format!("lock poisoned: {}", e)))
    }

    /// Insert a new identity, assigning an id when the record has none.
    ///
    /// `email` is only used as the label of staff records without a course.
    pub fn insert_identity(
        &self,
        record: &IdentityRecord,
        email: Option<&str>,
    ) -> DirectoryResult<IdentityId> {
        let id = record
            .id
            .clone()
            .unwrap_or_else(|| IdentityId::new(uuid::Uuid::new_v4().to_string()));
        let course = if record.course_or_role == UNASSIGNED_COURSE {
            None
        } else {
            Some(record.course_or_role.as_str())
        };

        let conn = self.lock()?;
        if let Some(card_id) = &record.card_id {
            if card_owner(&conn, card_id)?.is_some() {
                return Err(DirectoryError::CardAlreadyBound {
                    card_id: card_id.to_string(),
                });
            }
        }

        conn.execute(
            "INSERT INTO identities (identity_id, name, surname, course, email, photo, birth_date, can_bus, card_id, role)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id.as_str(),
                record.name,
                record.surname,
                course,
                email,
                record.photo.as_ref().map(|p| p.as_base64()),
                record
                    .birth_date
                    .map(|d| d.format(BIRTH_DATE_FORMAT).to_string()),
                record.has_transport_eligibility,
                record.card_id.as_ref().map(|c| c.as_str()),
                record.role.as_str(),
            ],
        )
        .map_err(|e| DirectoryError::Storage(format!("insert failed: {}", e)))?;

        debug!(identity = %id, role = %record.role, "identity inserted");
        Ok(id)
    }

    pub fn get_identity(&self, id: &IdentityId) -> DirectoryResult<Option<IdentityRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM identities WHERE identity_id = ?1",
            IDENTITY_COLUMNS
        );
        let record = conn
            .query_row(&sql, params![id.as_str()], read_identity)
            .optional()
            .map_err(|e| DirectoryError::Storage(format!("query failed: {}", e)))?;
        Ok(record)
    }

    pub fn find_by_card(&self, card_id: &CardId) -> DirectoryResult<Option<IdentityRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM identities WHERE card_id = ?1",
            IDENTITY_COLUMNS
        );
        let record = conn
            .query_row(&sql, params![card_id.as_str()], read_identity)
            .optional()
            .map_err(|e| DirectoryError::Storage(format!("query failed: {}", e)))?;
        Ok(record)
    }

    /// Identities of either role that still have no card.
    pub fn pending_binding(&self) -> DirectoryResult<Vec<IdentityRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM identities WHERE card_id IS NULL ORDER BY role, surname, name",
            IDENTITY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], read_identity)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Assign a card to an identity that has none.
    pub fn bind_card(
        &self,
        identity_id: &IdentityId,
        card_id: &CardId,
    ) -> DirectoryResult<IdentityRecord> {
        let conn = self.lock()?;

        let current: Option<Option<String>> = conn
            .query_row(
                "SELECT card_id FROM identities WHERE identity_id = ?1",
                params![identity_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match current {
            None => return Err(DirectoryError::IdentityNotFound(identity_id.to_string())),
            Some(Some(_)) => {
                return Err(DirectoryError::AlreadyBound {
                    identity_id: identity_id.to_string(),
                })
            }
            Some(None) => {}
        }

        if card_owner(&conn, card_id)?.is_some() {
            return Err(DirectoryError::CardAlreadyBound {
                card_id: card_id.to_string(),
            });
        }

        conn.execute(
            "UPDATE identities SET card_id = ?1, updated_at = datetime('now') WHERE identity_id = ?2",
            params![card_id.as_str(), identity_id.as_str()],
        )
        .map_err(|e| DirectoryError::Storage(format!("bind failed: {}", e)))?;

        info!(identity = %identity_id, card = %card_id, "card bound");

        let sql = format!(
            "SELECT {} FROM identities WHERE identity_id = ?1",
            IDENTITY_COLUMNS
        );
        let record = conn.query_row(&sql, params![identity_id.as_str()], read_identity)?;
        Ok(record)
    }

    pub fn record_registration(&self, event: &AuditEvent) -> DirectoryResult<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| DirectoryError::Storage(format!("encode failed: {}", e)))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO registrations (event_id, card_id, role, authorized, reason, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.event_id.as_str(),
                event.card_id.as_ref().map(|c| c.as_str()),
                event.role.map(|r| r.as_str()),
                event.authorized,
                event.reason.to_string(),
                payload,
            ],
        )
        .map_err(|e| DirectoryError::Storage(format!("insert failed: {}", e)))?;
        Ok(())
    }

    /// Most recent registrations first.
    pub fn registrations(&self, limit: usize) -> DirectoryResult<Vec<AuditEvent>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT payload FROM registrations ORDER BY seq DESC LIMIT ?1")?;
        let payloads = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(DirectoryError::from))
            .collect()
    }
}

fn card_owner(conn: &Connection, card_id: &CardId) -> DirectoryResult<Option<String>> {
    let owner = conn
        .query_row(
            "SELECT identity_id FROM identities WHERE card_id = ?1",
            params![card_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(owner)
}

fn read_identity(row: &Row<'_>) -> rusqlite::Result<IdentityRecord> {
    let identity_id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let surname: Option<String> = row.get(2)?;
    let course: Option<String> = row.get(3)?;
    let email: Option<String> = row.get(4)?;
    let photo: Option<String> = row.get(5)?;
    let birth_date: Option<String> = row.get(6)?;
    let can_bus: bool = row.get(7)?;
    let card_id: Option<String> = row.get(8)?;
    let role: String = row.get(9)?;

    let role = PersonRole::parse(&role).unwrap_or_else(|| {
        warn!(identity = %identity_id, "unrecognized role, treating as student");
        PersonRole::Student
    });

    let course_or_role = match (role, course.as_deref().map(str::trim)) {
        (PersonRole::Staff, None) | (PersonRole::Staff, Some("")) => email
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| STAFF_DEFAULT_LABEL.to_string()),
        _ => normalize_course(course.as_deref()),
    };

    // A malformed date is treated as missing, which never counts as adult
    let birth_date = birth_date.and_then(|raw| {
        let parsed = NaiveDate::parse_from_str(&raw, BIRTH_DATE_FORMAT).ok();
        if parsed.is_none() {
            warn!(identity = %identity_id, "unparseable birth date ignored");
        }
        parsed
    });

    let photo = photo
        .filter(|p| !p.is_empty())
        .and_then(|p| Photo::from_base64(p).ok());

    Ok(IdentityRecord {
        id: Some(IdentityId::new(identity_id)),
        name,
        surname,
        course_or_role,
        photo,
        birth_date,
        has_transport_eligibility: can_bus,
        card_id: card_id.map(CardId::new),
        role,
    })
}

#[async_trait]
impl IdentityDirectory for SqliteDirectory {
    async fn resolve(&self, card_id: &CardId) -> CoreResult<Lookup> {
        match self.find_by_card(card_id) {
            Ok(Some(record)) => Ok(Lookup::Found(record)),
            Ok(None) => Ok(Lookup::NotFound),
            Err(e) => Err(e.into_lookup_error()),
        }
    }
}

#[async_trait]
impl RegistrationSink for SqliteDirectory {
    async fn record(&self, event: &AuditEvent) -> CoreResult<()> {
        self.record_registration(event)
            .map_err(DirectoryError::into_sink_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatepass_core::{EventId, ReasonCode, Severity, Timestamp};

    fn test_directory() -> SqliteDirectory {
        SqliteDirectory::in_memory().unwrap()
    }

    fn adult() -> IdentityRecord {
        IdentityRecord::new("Ana", PersonRole::Student)
            .with_id("s-1")
            .with_surname("Ruiz")
            .with_course("2º Bachillerato")
            .with_birth_date(NaiveDate::from_ymd_opt(2000, 1, 1).unwrap())
            .with_card("04A1B2C3")
    }

    fn event(id: &str) -> AuditEvent {
        AuditEvent {
            event_id: EventId::new(id),
            card_id: Some(CardId::new("04A1B2C3")),
            role: Some(PersonRole::Student),
            subject_name: "Ana Ruiz".into(),
            authorized: true,
            severity: Severity::Success,
            reason: ReasonCode::Adult,
            status: "early exit".into(),
            recorded_at: Timestamp::from_seconds(1_700_000_000),
        }
    }

    #[tokio::test]
    async fn test_resolve_roundtrip() {
        let dir = test_directory();
        dir.insert_identity(&adult(), None).unwrap();

        match dir.resolve(&CardId::new("04A1B2C3")).await.unwrap() {
            Lookup::Found(record) => assert_eq!(record, adult()),
            Lookup::NotFound => panic!("expected a record"),
        }
        assert_eq!(
            dir.resolve(&CardId::new("UNKNOWN1")).await.unwrap(),
            Lookup::NotFound
        );
    }

    #[test]
    fn test_insert_assigns_id() {
        let dir = test_directory();
        let id = dir
            .insert_identity(&IdentityRecord::new("Luis", PersonRole::Student), None)
            .unwrap();
        let stored = dir.get_identity(&id).unwrap().unwrap();
        assert_eq!(stored.id, Some(id));
        assert_eq!(stored.course_or_role, UNASSIGNED_COURSE);
        assert!(!stored.has_transport_eligibility);
    }

    #[test]
    fn test_duplicate_card_rejected_on_insert() {
        let dir = test_directory();
        dir.insert_identity(&adult(), None).unwrap();
        let other = IdentityRecord::new("Eva", PersonRole::Student).with_card("04A1B2C3");
        assert!(matches!(
            dir.insert_identity(&other, None),
            Err(DirectoryError::CardAlreadyBound { .. })
        ));
    }

    #[test]
    fn test_staff_label_falls_back_to_email_then_default() {
        let dir = test_directory();
        let with_email = dir
            .insert_identity(
                &IdentityRecord::new("Marta", PersonRole::Staff),
                Some("marta@school.example"),
            )
            .unwrap();
        let without = dir
            .insert_identity(&IdentityRecord::new("Pablo", PersonRole::Staff), None)
            .unwrap();

        assert_eq!(
            dir.get_identity(&with_email).unwrap().unwrap().course_or_role,
            "marta@school.example"
        );
        assert_eq!(
            dir.get_identity(&without).unwrap().unwrap().course_or_role,
            STAFF_DEFAULT_LABEL
        );
    }

    #[test]
    fn test_pending_binding_and_bind() {
        let dir = test_directory();
        dir.insert_identity(&adult(), None).unwrap();
        let student = dir
            .insert_identity(&IdentityRecord::new("Eva", PersonRole::Student), None)
            .unwrap();
        dir.insert_identity(&IdentityRecord::new("Pablo", PersonRole::Staff), None)
            .unwrap();

        let pending = dir.pending_binding().unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|r| r.is_pending_binding()));

        let bound = dir.bind_card(&student, &CardId::new("NEWCARD")).unwrap();
        assert_eq!(bound.card_id, Some(CardId::new("NEWCARD")));
        assert_eq!(dir.pending_binding().unwrap().len(), 1);
        assert_eq!(
            dir.find_by_card(&CardId::new("NEWCARD")).unwrap().unwrap().name,
            "Eva"
        );
    }

    #[test]
    fn test_bind_rejections() {
        let dir = test_directory();
        dir.insert_identity(&adult(), None).unwrap();
        let eva = dir
            .insert_identity(&IdentityRecord::new("Eva", PersonRole::Student), None)
            .unwrap();

        assert!(matches!(
            dir.bind_card(&eva, &CardId::new("04A1B2C3")),
            Err(DirectoryError::CardAlreadyBound { .. })
        ));
        assert!(matches!(
            dir.bind_card(&IdentityId::new("s-1"), &CardId::new("OTHER")),
            Err(DirectoryError::AlreadyBound { .. })
        ));
        assert!(matches!(
            dir.bind_card(&IdentityId::new("missing"), &CardId::new("OTHER")),
            Err(DirectoryError::IdentityNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_registrations_newest_first() {
        let dir = test_directory();
        dir.record(&event("e-1")).await.unwrap();
        dir.record(&event("e-2")).await.unwrap();
        // Re-delivery of the same event is ignored
        dir.record(&event("e-2")).await.unwrap();

        let stored = dir.registrations(10).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].event_id, EventId::new("e-2"));
        assert_eq!(stored[1], event("e-1"));
        assert_eq!(dir.registrations(1).unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_birth_date_is_missing() {
        let dir = test_directory();
        let id = dir
            .insert_identity(&IdentityRecord::new("Eva", PersonRole::Student), None)
            .unwrap();
        {
            let conn = dir.conn.lock().unwrap();
            conn.execute(
                "UPDATE identities SET birth_date = 'yesterday' WHERE identity_id = ?1",
                params![id.as_str()],
            )
            .unwrap();
        }
        assert!(dir.get_identity(&id).unwrap().unwrap().birth_date.is_none());
    }

    #[test]
    fn test_open_file_database() {
        let path = std::env::temp_dir().join(format!(
            "gatepass-directory-{}.db",
            uuid::Uuid::new_v4()
        ));
        let path_str = path.to_string_lossy().to_string();
        {
            let dir = SqliteDirectory::open(&path_str).unwrap();
            dir.insert_identity(&adult(), None).unwrap();
        }
        let reopened = SqliteDirectory::open(&path_str).unwrap();
        assert!(reopened
            .find_by_card(&CardId::new("04A1B2C3"))
            .unwrap()
            .is_some());
        let _ = std::fs::remove_file(&path);
    }
}
