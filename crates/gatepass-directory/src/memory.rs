use async_trait::async_trait;
use gatepass_core::{CardId, CoreError, CoreResult, IdentityDirectory, IdentityRecord, Lookup};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{DirectoryError, DirectoryResult};

/// In-memory directory keyed by card identifier.
///
/// Used for tests and demos. Can be switched offline to simulate an
/// unreachable server, and delayed to simulate a slow one.
pub struct InMemoryDirectory {
    records: Mutex<HashMap<CardId, IdentityRecord>>,
    online: AtomicBool,
    latency: Mutex<Duration>,
    lookups: AtomicUsize,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Add a record. The record must carry a card and the card must not
    /// belong to anyone else. Re-inserting the same identity replaces it and
    /// unbinds whatever card it held before.
    pub fn insert(&self, record: IdentityRecord) -> DirectoryResult<()> {
        let card_id = record.card_id.clone().ok_or_else(|| {
            DirectoryError::InvalidRecord("record has no card identifier".into())
        })?;

        let mut records = self
            .records
            .lock()
            .map_err(|e| DirectoryError::Storage(format!("lock poisoned: {}", e)))?;

        if let Some(existing) = records.get(&card_id) {
            if existing.id.is_none() || existing.id != record.id {
                return Err(DirectoryError::CardAlreadyBound {
                    card_id: card_id.to_string(),
                });
            }
        }

        if record.id.is_some() {
            records.retain(|_, existing| existing.id != record.id);
        }
        records.insert(card_id, record);
        Ok(())
    }

    /// Unbind a card. Returns the record it pointed to, if any.
    pub fn remove(&self, card_id: &CardId) -> DirectoryResult<Option<IdentityRecord>> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| DirectoryError::Storage(format!("lock poisoned: {}", e)))?;
        Ok(records.remove(card_id))
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut guard) = self.latency.lock() {
            *guard = latency;
        }
    }

    /// Number of resolve calls served so far, including failed ones.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryDirectory {
    async fn resolve(&self, card_id: &CardId) -> CoreResult<Lookup> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        let latency = self
            .latency
            .lock()
            .map(|l| *l)
            .map_err(|e| CoreError::DirectoryUnreachable(format!("lock poisoned: {}", e)))?;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if !self.online.load(Ordering::SeqCst) {
            return Err(CoreError::DirectoryUnreachable(
                "directory is offline".into(),
            ));
        }

        let records = self
            .records
            .lock()
            .map_err(|e| CoreError::DirectoryUnreachable(format!("lock poisoned: {}", e)))?;

        Ok(match records.get(card_id) {
            Some(record) => Lookup::Found(record.clone()),
            None => Lookup::NotFound,
        })
    }
}
