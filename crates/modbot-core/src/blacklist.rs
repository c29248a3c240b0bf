use std::sync::Arc;

use chrono::Utc;

use crate::{
    audit::AuditLog,
    domain::{AuditAction, BlacklistEntry, NewAuditEntry, UserId},
    keyed::KeyedCollection,
    storage::{Storage, WriteOutcome},
    Result,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlacklistStats {
    pub count: u64,
    /// Size of the shared audit log, not only blacklist actions.
    pub total_actions: u64,
    pub last_action: Option<String>,
}

/// The set of banned user ids. Every successful mutation is audited.
#[derive(Clone)]
pub struct BlacklistStore {
    entries: KeyedCollection<BlacklistEntry>,
    audit: AuditLog,
}

impl BlacklistStore {
    pub fn new(storage: Arc<dyn Storage>, audit: AuditLog) -> Self {
        Self {
            entries: KeyedCollection::new(storage),
            audit,
        }
    }

    /// Returns `false` if `user_id` is already blacklisted; nothing is written then.
    pub async fn add(&self, user_id: UserId, label: Option<String>) -> Result<bool> {
        let mut audit = NewAuditEntry::new(AuditAction::Add).user(user_id);
        audit.details = label.clone();

        let entry = BlacklistEntry {
            user_id,
            label,
            created_at: Utc::now(),
        };
        let outcome = self.entries.insert(entry, Some(audit)).await?;
        Ok(self.finish(user_id, "added", outcome))
    }

    /// Returns `false` if `user_id` was not blacklisted; nothing is written then.
    pub async fn remove(&self, user_id: UserId) -> Result<bool> {
        let audit = NewAuditEntry::new(AuditAction::Remove).user(user_id);
        let outcome = self.entries.remove(user_id.0, Some(audit)).await?;
        Ok(self.finish(user_id, "removed", outcome))
    }

    pub async fn contains(&self, user_id: UserId) -> Result<bool> {
        self.entries.contains(user_id.0).await
    }

    /// Snapshot of blacklisted ids, ascending.
    pub async fn list_all(&self) -> Result<Vec<UserId>> {
        Ok(self.entries.keys().await?.into_iter().map(UserId).collect())
    }

    pub async fn entries(&self) -> Result<Vec<BlacklistEntry>> {
        self.entries.all().await
    }

    pub async fn stats(&self) -> Result<BlacklistStats> {
        let count = self.entries.len().await?;
        let total_actions = self.audit.count().await?;
        let last_action = self.audit.most_recent().await?.map(|e| e.summary());
        Ok(BlacklistStats {
            count,
            total_actions,
            last_action,
        })
    }

    fn finish(&self, user_id: UserId, verb: &str, outcome: WriteOutcome) -> bool {
        match outcome {
            WriteOutcome::Applied(entry) => {
                if let Some(entry) = &entry {
                    self.audit.mirror(entry);
                }
                tracing::info!(user_id = user_id.0, "blacklist: {verb}");
                true
            }
            WriteOutcome::Unchanged => {
                tracing::debug!(user_id = user_id.0, "blacklist: not {verb} (no-op)");
                false
            }
        }
    }
}
