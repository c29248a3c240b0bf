//! Durable-state port.
//!
//! Three collections live behind this trait: the blacklist, the moderated chats
//! and the shared append-only audit log. Keyed writes carry their audit entry so
//! a backend can apply both in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    domain::{AuditAction, AuditEntry, ChatId, NewAuditEntry},
    Result,
};

pub mod memory;

pub use memory::MemoryStorage;

/// Keyed collections known to the storage layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Collection {
    Blacklist,
    ModeratedChats,
}

/// Row shape shared by every keyed collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub key: i64,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of a keyed write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Key already present (insert) or absent (delete). Nothing was written.
    Unchanged,
    /// The write happened, together with its audit entry if one was given.
    Applied(Option<AuditEntry>),
}

impl WriteOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied(_))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditQuery {
    pub action: Option<AuditAction>,
    pub chat_id: Option<ChatId>,
    pub limit: Option<usize>,
}

/// Storage backend.
///
/// `insert` and `delete` must make the existence check and the write atomic:
/// two concurrent inserts of one key never both report `Applied`.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert(
        &self,
        collection: Collection,
        record: Record,
        audit: Option<NewAuditEntry>,
    ) -> Result<WriteOutcome>;

    async fn delete(
        &self,
        collection: Collection,
        key: i64,
        audit: Option<NewAuditEntry>,
    ) -> Result<WriteOutcome>;

    async fn contains(&self, collection: Collection, key: i64) -> Result<bool>;

    /// All records, ascending by key.
    async fn records(&self, collection: Collection) -> Result<Vec<Record>>;

    async fn keys(&self, collection: Collection) -> Result<Vec<i64>> {
        Ok(self
            .records(collection)
            .await?
            .into_iter()
            .map(|r| r.key)
            .collect())
    }

    async fn count(&self, collection: Collection) -> Result<u64>;

    /// Append and return the stored entry. Visible to `query_audit` once this returns.
    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry>;

    async fn audit_count(&self) -> Result<u64>;

    /// Matching entries, newest first.
    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>>;

    /// Release connections. Called once at shutdown.
    async fn close(&self) {}
}
