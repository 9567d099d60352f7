//! Per-sender unread counters and their persistence.
//!
//! Counters are keyed by sender and persisted per local identity, so a
//! restart (or a second account on the same machine) sees its own counts.
//! They only grow on a push from a non-selected sender and only reset when
//! that sender's conversation is opened.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::client::ClientError;
use crate::model::UserId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnreadCounters(BTreeMap<UserId, u32>);

impl UnreadCounters {
    #[must_use]
    pub fn get(&self, sender: &UserId) -> u32 {
        self.0.get(sender).copied().unwrap_or(0)
    }

    /// Bump `sender` by one and return the new count.
    pub fn increment(&mut self, sender: &UserId) -> u32 {
        let count = self.0.entry(sender.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Drop `sender`'s counter. Returns whether there was anything to clear.
    pub fn clear(&mut self, sender: &UserId) -> bool {
        self.0.remove(sender).is_some_and(|n| n > 0)
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.0.values().fold(0, |acc, n| acc.saturating_add(*n))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UserId, u32)> {
        self.0.iter().map(|(k, v)| (k, *v))
    }
}

/// Durable home for one identity's counters.
pub trait UnreadStore: Send + Sync {
    /// Counters for `owner`; empty if nothing was ever saved.
    ///
    /// # Errors
    ///
    /// Backend read or decode failure.
    fn load(&self, owner: &UserId) -> Result<UnreadCounters, ClientError>;

    /// Replace `owner`'s counters.
    ///
    /// # Errors
    ///
    /// Backend write or encode failure.
    fn save(&self, owner: &UserId, counters: &UnreadCounters) -> Result<(), ClientError>;
}

// =============================================================================
// JSON FILE
// =============================================================================

/// One JSON file holding every local identity's counters:
/// `{"alice": {"bob": 2}, "carol": {}}`.
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write of the shared file.
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    fn read_all(&self) -> Result<HashMap<UserId, UnreadCounters>, ClientError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(HashMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl UnreadStore for JsonFileStore {
    fn load(&self, owner: &UserId) -> Result<UnreadCounters, ClientError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_all()?.remove(owner).unwrap_or_default())
    }

    fn save(&self, owner: &UserId, counters: &UnreadCounters) -> Result<(), ClientError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all = self.read_all()?;
        all.insert(owner.clone(), counters.clone());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        // Write-then-rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&all)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// =============================================================================
// IN-MEMORY
// =============================================================================

#[derive(Default)]
pub struct MemoryUnreadStore {
    inner: Mutex<HashMap<UserId, UnreadCounters>>,
}

impl MemoryUnreadStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl UnreadStore for MemoryUnreadStore {
    fn load(&self, owner: &UserId) -> Result<UnreadCounters, ClientError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.get(owner).cloned().unwrap_or_default())
    }

    fn save(&self, owner: &UserId, counters: &UnreadCounters) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.insert(owner.clone(), counters.clone());
        Ok(())
    }
}

#[cfg(test)]
#[path = "unread_test.rs"]
mod tests;
