use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::{
    domain::{AuditEntry, NewAuditEntry},
    storage::{AuditQuery, Collection, Record, Storage, WriteOutcome},
    Result,
};

#[derive(Default)]
struct MemoryState {
    collections: HashMap<Collection, BTreeMap<i64, Record>>,
    audit: Vec<AuditEntry>,
}

impl MemoryState {
    fn push_audit(&mut self, entry: NewAuditEntry) -> AuditEntry {
        let seq = self.audit.len() as i64 + 1;
        let stored = entry.stored(seq, Utc::now());
        self.audit.push(stored.clone());
        stored
    }
}

/// Process-local backend. Everything is lost on restart.
///
/// One mutex guards all collections, so every write (including its audit
/// entry) is applied as a unit.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn insert(
        &self,
        collection: Collection,
        record: Record,
        audit: Option<NewAuditEntry>,
    ) -> Result<WriteOutcome> {
        let mut st = self.state.lock().await;
        let rows = st.collections.entry(collection).or_default();
        if rows.contains_key(&record.key) {
            return Ok(WriteOutcome::Unchanged);
        }
        rows.insert(record.key, record);

        let stored = audit.map(|a| st.push_audit(a));
        Ok(WriteOutcome::Applied(stored))
    }

    async fn delete(
        &self,
        collection: Collection,
        key: i64,
        audit: Option<NewAuditEntry>,
    ) -> Result<WriteOutcome> {
        let mut st = self.state.lock().await;
        let removed = st
            .collections
            .get_mut(&collection)
            .and_then(|rows| rows.remove(&key));
        if removed.is_none() {
            return Ok(WriteOutcome::Unchanged);
        }

        let stored = audit.map(|a| st.push_audit(a));
        Ok(WriteOutcome::Applied(stored))
    }

    async fn contains(&self, collection: Collection, key: i64) -> Result<bool> {
        let st = self.state.lock().await;
        Ok(st
            .collections
            .get(&collection)
            .is_some_and(|rows| rows.contains_key(&key)))
    }

    async fn records(&self, collection: Collection) -> Result<Vec<Record>> {
        let st = self.state.lock().await;
        Ok(st
            .collections
            .get(&collection)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        let st = self.state.lock().await;
        Ok(st
            .collections
            .get(&collection)
            .map(|rows| rows.len() as u64)
            .unwrap_or(0))
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
        let mut st = self.state.lock().await;
        Ok(st.push_audit(entry))
    }

    async fn audit_count(&self) -> Result<u64> {
        Ok(self.state.lock().await.audit.len() as u64)
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        let st = self.state.lock().await;
        let mut out: Vec<AuditEntry> = st
            .audit
            .iter()
            .filter(|e| query.action.map_or(true, |a| e.action == a))
            .filter(|e| query.chat_id.map_or(true, |c| e.chat_id == Some(c)))
            .cloned()
            .collect();
        out.sort_by(AuditEntry::newest_first);
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}
