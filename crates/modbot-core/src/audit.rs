//! Append-only moderation audit log.
//!
//! There is deliberately no update or delete here: entries are written through
//! [`AuditLog::append`] or together with a keyed write, and are read back only.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    domain::{AuditAction, AuditEntry, ChatId, NewAuditEntry},
    errors::Error,
    storage::{AuditQuery, Storage},
    Result,
};

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone)]
pub struct AuditLog {
    storage: Arc<dyn Storage>,
    mirror: Option<AuditMirror>,
}

impl AuditLog {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            mirror: None,
        }
    }

    pub fn with_mirror(mut self, mirror: AuditMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Store `entry`, stamping `created_at` if it is unset.
    pub async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
        let stored = self.storage.append_audit(entry).await?;
        self.mirror(&stored);
        Ok(stored)
    }

    pub async fn most_recent(&self) -> Result<Option<AuditEntry>> {
        let q = AuditQuery {
            limit: Some(1),
            ..AuditQuery::default()
        };
        Ok(self.storage.query_audit(&q).await?.into_iter().next())
    }

    pub async fn count(&self) -> Result<u64> {
        self.storage.audit_count().await
    }

    /// Matching entries, newest first.
    pub async fn query(
        &self,
        action: Option<AuditAction>,
        chat_id: Option<ChatId>,
        limit: Option<usize>,
    ) -> Result<Vec<AuditEntry>> {
        let q = AuditQuery {
            action,
            chat_id,
            limit,
        };
        self.storage.query_audit(&q).await
    }

    /// Copy an already stored entry to the file mirror, if configured.
    ///
    /// The database stays the source of truth, so mirror failures are only logged.
    pub(crate) fn mirror(&self, entry: &AuditEntry) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        if let Err(e) = mirror.write(entry) {
            tracing::warn!(path = %mirror.path().display(), "failed to mirror audit entry: {e}");
        }
    }
}

/// Append-only file copy of the audit log (JSON lines or plain text blocks).
#[derive(Clone, Debug)]
pub struct AuditMirror {
    path: PathBuf,
    json: bool,
}

impl AuditMirror {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, entry: &AuditEntry) -> Result<()> {
        let mut entry = entry.clone();
        if let Some(s) = &entry.details {
            entry.details = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&entry)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&entry)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit entry is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            match v {
                serde_json::Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}
