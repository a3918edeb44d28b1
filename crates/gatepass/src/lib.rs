//! Gatepass: exit authorization for a school gate.
//!
//! Wires the workspace crates into one running terminal: a directory
//! (local SQLite or a remote gatepass server), the policy engine, a decision
//! session with an escort question registry, and the audit sinks.

pub mod config;
pub mod error;
pub mod http;

pub use config::{AuditConfig, DirectoryConfig, DirectoryMode, RootConfig, ServerConfig};
pub use error::{RootError, RootResult};

use gatepass_core::{IdentityDirectory, IdentityId, IdentityRecord, RegistrationSink};
use gatepass_directory::{HttpDirectory, HttpRegistrationSink, SqliteDirectory};
use gatepass_policy::PolicyEngine;
use gatepass_session::{
    AuditLog, DecisionSession, EventEmitter, PendingEscortPrompt, SessionState, Status,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Everything a running terminal needs.
pub struct GateState {
    pub config: RootConfig,
    /// Present in local mode only.
    pub store: Option<Arc<SqliteDirectory>>,
    pub session: Arc<DecisionSession>,
    pub prompt: Arc<PendingEscortPrompt>,
    pub audit_log: Arc<AuditLog>,
}

impl GateState {
    pub fn mode(&self) -> DirectoryMode {
        self.config.directory.mode
    }

    /// The local store, or `Unsupported` when identities live on a remote
    /// server.
    pub fn local_store(&self) -> RootResult<&SqliteDirectory> {
        self.store.as_deref().ok_or_else(|| {
            RootError::Unsupported(format!(
                "identities are managed by {}",
                self.config.directory.url.as_deref().unwrap_or("the remote server")
            ))
        })
    }

    /// Look up an identity for manual selection.
    pub fn find_identity(&self, id: &IdentityId) -> RootResult<Option<IdentityRecord>> {
        Ok(self.local_store()?.get_identity(id)?)
    }
}

/// Completes once a cycle newer than `after` suspends for an escort answer.
/// Never completes if the session is dropped.
pub async fn escort_requested(status: &mut watch::Receiver<Status>, after: u64) {
    loop {
        {
            let current = status.borrow_and_update();
            if current.cycle > after && current.state == SessionState::AwaitingEscort {
                return;
            }
        }
        if status.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Build the terminal from configuration.
pub fn initialize(config: RootConfig) -> RootResult<GateState> {
    config.validate()?;

    info!(
        mode = ?config.directory.mode,
        database = %config.database_path.display(),
        "initializing gatepass"
    );

    let audit_log = Arc::new(AuditLog::with_capacity(config.audit.log_capacity));
    let mut emitter = EventEmitter::new(config.audit.retry_policy())?.with_sink(audit_log.clone());

    let (store, directory): (Option<Arc<SqliteDirectory>>, Arc<dyn IdentityDirectory>) =
        match config.directory.mode {
            DirectoryMode::Local => {
                if let Some(parent) = config.database_path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            RootError::Internal(format!(
                                "failed to create data directory {}: {}",
                                parent.display(),
                                e
                            ))
                        })?;
                    }
                }
                let store = Arc::new(SqliteDirectory::open(
                    &config.database_path.to_string_lossy(),
                )?);
                emitter = emitter.with_sink(store.clone() as Arc<dyn RegistrationSink>);
                (Some(store.clone()), store as Arc<dyn IdentityDirectory>)
            }
            DirectoryMode::Remote => {
                let url = config.directory.url.clone().ok_or_else(|| {
                    RootError::Config("directory.url is required in remote mode".into())
                })?;
                let timeout = Duration::from_secs(config.directory.timeout_secs);
                let sink = Arc::new(HttpRegistrationSink::new(&url, timeout)?);
                emitter = emitter.with_sink(sink);
                let directory: Arc<dyn IdentityDirectory> =
                    Arc::new(HttpDirectory::new(&url, timeout)?);
                (None, directory)
            }
        };

    let engine = PolicyEngine::new(config.policy)?;
    let prompt = Arc::new(PendingEscortPrompt::new());
    let session = Arc::new(DecisionSession::new(
        engine,
        directory,
        prompt.clone(),
        emitter,
    ));

    Ok(GateState {
        config,
        store,
        session,
        prompt,
        audit_log,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatepass_core::PersonRole;

    fn temp_config(name: &str) -> RootConfig {
        let dir = std::env::temp_dir().join(format!(
            "gatepass-lib-{}-{}",
            name,
            std::process::id()
        ));
        RootConfig {
            database_path: dir.join("gatepass.db"),
            ..RootConfig::default()
        }
    }

    #[test]
    fn test_initialize_local_creates_database() {
        let config = temp_config("local");
        let db = config.database_path.clone();
        let state = initialize(config).unwrap();
        assert!(db.exists());
        assert_eq!(state.mode(), DirectoryMode::Local);
        assert!(state.store.is_some());
        let _ = std::fs::remove_dir_all(db.parent().unwrap());
    }

    #[test]
    fn test_initialize_remote_has_no_store() {
        let mut config = temp_config("remote");
        config.directory.mode = DirectoryMode::Remote;
        config.directory.url = Some("http://127.0.0.1:9".into());
        let state = initialize(config).unwrap();
        assert!(state.store.is_none());
        assert!(matches!(
            state.find_identity(&IdentityId::new("s-1")),
            Err(RootError::Unsupported(_))
        ));
    }

    #[test]
    fn test_find_identity_in_local_store() {
        let config = temp_config("find");
        let db = config.database_path.clone();
        let state = initialize(config).unwrap();
        let id = state
            .local_store()
            .unwrap()
            .insert_identity(&IdentityRecord::new("Ana", PersonRole::Student), None)
            .unwrap();
        assert_eq!(state.find_identity(&id).unwrap().unwrap().name, "Ana");
        assert!(state
            .find_identity(&IdentityId::new("missing"))
            .unwrap()
            .is_none());
        let _ = std::fs::remove_dir_all(db.parent().unwrap());
    }

    #[test]
    fn test_initialize_rejects_invalid_config() {
        let mut config = temp_config("invalid");
        config.policy.adult_age = 0;
        assert!(initialize(config).is_err());
    }
}
