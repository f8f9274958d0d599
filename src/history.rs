//! Sled-backed history of summary records.
//!
//! Bounded, most-recent-first, and keyed by source URL so re-analyzing the
//! same page replaces its entry instead of growing the list.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::SummaryRecord;

/// Maximum number of envelopes kept; older ones are pruned on save.
const HISTORY_CAPACITY: usize = 50;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("database error: {0}")]
    DbError(#[from] sled::Error),
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// A stored record with persistence metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Stable identifier, derived from the source URL
    pub id: String,
    /// The source URL
    pub url: String,
    /// When this entry was last saved
    pub saved_at: DateTime<Utc>,
    /// The record itself
    pub record: SummaryRecord,
}

/// Bounded history store over sled.
pub struct History {
    db: sled::Db,
}

impl History {
    /// Open or create the history store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, HistoryError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Save a record, replacing any previous entry for the same URL.
    /// Prunes the oldest entries beyond capacity.
    pub fn save(&self, record: &SummaryRecord) -> Result<(), HistoryError> {
        let id = Self::entry_id(&record.source_url);
        let entry = HistoryEntry {
            id: id.clone(),
            url: record.source_url.clone(),
            saved_at: Utc::now(),
            record: record.clone(),
        };
        let value = serde_json::to_vec(&entry)?;
        self.db.insert(id.as_bytes(), value)?;
        self.prune()?;
        self.db.flush()?;
        Ok(())
    }

    /// Retrieve an entry by id
    pub fn get(&self, id: &str) -> Result<Option<HistoryEntry>, HistoryError> {
        match self.db.get(id.as_bytes())? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Retrieve the entry for a URL, if any
    pub fn get_by_url(&self, url: &str) -> Result<Option<HistoryEntry>, HistoryError> {
        self.get(&Self::entry_id(url))
    }

    /// List all entries, most recent first
    pub fn list(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let mut entries = Vec::new();
        for item in self.db.iter() {
            let (_key, value) = item?;
            let entry: HistoryEntry = serde_json::from_slice(&value)?;
            entries.push(entry);
        }
        entries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(entries)
    }

    /// Delete an entry by id
    pub fn delete(&self, id: &str) -> Result<bool, HistoryError> {
        let existed = self.db.remove(id.as_bytes())?.is_some();
        self.db.flush()?;
        Ok(existed)
    }

    /// Remove every entry
    pub fn clear(&self) -> Result<(), HistoryError> {
        self.db.clear()?;
        self.db.flush()?;
        Ok(())
    }

    /// Number of stored entries
    pub fn count(&self) -> usize {
        self.db.len()
    }

    fn prune(&self) -> Result<(), HistoryError> {
        if self.db.len() <= HISTORY_CAPACITY {
            return Ok(());
        }
        let entries = self.list()?;
        for stale in entries.iter().skip(HISTORY_CAPACITY) {
            self.db.remove(stale.id.as_bytes())?;
        }
        Ok(())
    }

    /// Derive a stable key from the source URL
    fn entry_id(url: &str) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        format!("{:x}", hasher.finish())
    }
}
