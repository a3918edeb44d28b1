//! In-memory audit log of gate decisions.
//!
//! Entries are hash-chained: each hash covers the previous hash and the
//! serialized event, so editing or dropping an entry breaks verification.
//! The log keeps the newest `capacity` entries. When an entry is evicted its
//! hash becomes the anchor the remaining chain is verified from.

use async_trait::async_trait;
use gatepass_core::{AuditEvent, AuditHash, CoreError, CoreResult, RegistrationSink};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::error::{SessionError, SessionResult};

/// Entries kept by [`AuditLog::new`].
pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainedEvent {
    pub event: AuditEvent,
    pub hash: String,
}

struct Entry {
    event: AuditEvent,
    hash: AuditHash,
}

impl Entry {
    fn chained(&self) -> ChainedEvent {
        ChainedEvent {
            event: self.event.clone(),
            hash: self.hash.to_string(),
        }
    }
}

struct Chain {
    entries: VecDeque<Entry>,
    /// Hash of the newest evicted entry.
    anchor: Option<AuditHash>,
    appended: u64,
}

pub struct AuditLog {
    chain: Mutex<Chain>,
    capacity: usize,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }

    /// Keep at most `capacity` entries (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            chain: Mutex::new(Chain {
                entries: VecDeque::with_capacity(capacity.min(DEFAULT_AUDIT_CAPACITY)),
                anchor: None,
                appended: 0,
            }),
            capacity,
        }
    }

    fn lock(&self) -> SessionResult<MutexGuard<'_, Chain>> {
        self.chain
            .lock()
            .map_err(|_| SessionError::AuditFailed("lock poisoned".into()))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an event. Returns the entry's chain hash as hex.
    pub fn append(&self, event: AuditEvent) -> SessionResult<String> {
        let payload = serde_json::to_vec(&event)
            .map_err(|e| SessionError::AuditFailed(format!("failed to serialize event: {}", e)))?;

        let mut chain = self.lock()?;
        let previous = chain.entries.back().map(|e| e.hash).or(chain.anchor);
        let hash = AuditHash::chain(previous.as_ref(), &payload);
        chain.entries.push_back(Entry { event, hash });
        chain.appended += 1;

        while chain.entries.len() > self.capacity {
            if let Some(evicted) = chain.entries.pop_front() {
                chain.anchor = Some(evicted.hash);
            }
        }

        Ok(hash.to_string())
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> SessionResult<Vec<ChainedEvent>> {
        Ok(self.lock()?.entries.iter().map(Entry::chained).collect())
    }

    /// Most recent `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> SessionResult<Vec<ChainedEvent>> {
        Ok(self
            .lock()?
            .entries
            .iter()
            .rev()
            .take(limit)
            .map(Entry::chained)
            .collect())
    }

    /// Entries currently retained.
    pub fn len(&self) -> usize {
        self.lock().map(|c| c.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events appended since start-up, evicted ones included.
    pub fn appended(&self) -> u64 {
        self.lock().map(|c| c.appended).unwrap_or(0)
    }

    /// Recompute every retained link, starting from the eviction anchor, and
    /// compare with the stored hashes.
    pub fn verify_chain(&self) -> SessionResult<bool> {
        let chain = self.lock()?;

        let mut previous = chain.anchor;
        for entry in chain.entries.iter() {
            let payload = serde_json::to_vec(&entry.event).map_err(|e| {
                SessionError::AuditFailed(format!("failed to serialize for verification: {}", e))
            })?;
            let expected = AuditHash::chain(previous.as_ref(), &payload);
            if expected != entry.hash {
                return Ok(false);
            }
            previous = Some(expected);
        }
        Ok(true)
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistrationSink for AuditLog {
    async fn record(&self, event: &AuditEvent) -> CoreResult<()> {
        self.append(event.clone())
            .map(|_| ())
            .map_err(|e| CoreError::SinkFailed(e.to_string()))
    }
}
