use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric). Groups and supergroups are negative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A blacklisted user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlacklistEntry {
    pub user_id: UserId,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A chat under periodic supervision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeratedChat {
    pub chat_id: ChatId,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Add,
    Remove,
    Check,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Add => "add",
            AuditAction::Remove => "remove",
            AuditAction::Check => "check",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(AuditAction::Add),
            "remove" => Some(AuditAction::Remove),
            "check" => Some(AuditAction::Check),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An audit entry that has not been stored yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub action: AuditAction,
    pub user_id: Option<UserId>,
    pub chat_id: Option<ChatId>,
    pub details: Option<String>,
    /// Assigned by the log on append when `None`.
    pub created_at: Option<DateTime<Utc>>,
}

impl NewAuditEntry {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            user_id: None,
            chat_id: None,
            details: None,
            created_at: None,
        }
    }

    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn chat(mut self, chat_id: ChatId) -> Self {
        self.chat_id = Some(chat_id);
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Stamp the entry, keeping an explicit timestamp if one was given.
    pub fn stored(self, seq: i64, now: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            seq,
            action: self.action,
            user_id: self.user_id,
            chat_id: self.chat_id,
            details: self.details,
            created_at: self.created_at.unwrap_or(now),
        }
    }
}

/// A stored, immutable audit entry. `seq` is the insertion order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub seq: i64,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// One-line human summary, used for `/stats` and `/log`.
    pub fn summary(&self) -> String {
        let mut out = self.action.to_string();
        if let Some(user) = self.user_id {
            out.push_str(&format!(" user_id={user}"));
        }
        if let Some(chat) = self.chat_id {
            out.push_str(&format!(" chat_id={chat}"));
        }
        if let Some(details) = self.details.as_deref() {
            out.push_str(&format!(" ({details})"));
        }
        out.push_str(&format!(
            " at {}",
            self.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        out
    }

    /// Newest-first ordering: later `created_at` first, ties by later `seq`.
    pub fn newest_first(a: &AuditEntry, b: &AuditEntry) -> std::cmp::Ordering {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.seq.cmp(&a.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn summary_mentions_action_and_targets() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 8, 0, 0).unwrap();
        let entry = NewAuditEntry::new(AuditAction::Check)
            .chat(ChatId(-100))
            .details("checked 2 users, removed 1")
            .stored(7, at);

        assert_eq!(
            entry.summary(),
            "check chat_id=-100 (checked 2 users, removed 1) at 2026-01-02 08:00:00 UTC"
        );
    }

    #[test]
    fn explicit_timestamp_is_kept() {
        let at = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let entry = NewAuditEntry::new(AuditAction::Add).at(at).stored(1, now);
        assert_eq!(entry.created_at, at);
    }

    #[test]
    fn newest_first_breaks_ties_by_seq() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let a = NewAuditEntry::new(AuditAction::Add).stored(1, at);
        let b = NewAuditEntry::new(AuditAction::Remove).stored(2, at);
        let mut v = vec![a.clone(), b.clone()];
        v.sort_by(AuditEntry::newest_first);
        assert_eq!(v, vec![b, a]);
    }

    #[test]
    fn action_round_trips_through_text() {
        for a in [AuditAction::Add, AuditAction::Remove, AuditAction::Check] {
            assert_eq!(AuditAction::parse(a.as_str()), Some(a));
        }
        assert_eq!(AuditAction::parse("check_chat"), None);
    }
}
