//! Plain-text renderings shared by the command handlers and the scheduler.

use crate::{
    blacklist::BlacklistStats,
    domain::{BlacklistEntry, ChatId},
    reconcile::SweepReport,
};

/// Report sent to a chat (and its administrators) after a sweep.
pub fn sweep_report_text(report: &SweepReport) -> String {
    let mut lines = Vec::new();
    if report.succeeded.is_empty() && report.failed.is_empty() {
        lines.push(format!(
            "Chat check finished: no blacklisted members found (blacklist size: {}).",
            report.checked
        ));
    } else {
        lines.push(format!(
            "Chat check finished.\nBanned by blacklist: {}",
            report.succeeded.len()
        ));
        for user in &report.succeeded {
            lines.push(format!("- {user}"));
        }
    }
    if !report.failed.is_empty() {
        lines.push(format!("Could not ban: {}", report.failed.len()));
        for f in &report.failed {
            lines.push(format!("- {} ({})", f.user_id, f.error));
        }
    }
    if !report.skipped.is_empty() {
        lines.push(format!(
            "Skipped chat administrators: {}",
            join_ids(report.skipped.iter())
        ));
    }
    lines.join("\n")
}

/// Same report, tagged for delivery to an administrator's private chat.
pub fn admin_copy(chat_id: ChatId, text: &str) -> String {
    format!("[chat {chat_id}] {text}")
}

pub fn stats_text(stats: &BlacklistStats) -> String {
    format!(
        "Stats (admins only):\n- Blacklisted: {}\n- Total actions: {}\n- Last action: {}",
        stats.count,
        stats.total_actions,
        stats.last_action.as_deref().unwrap_or("no data")
    )
}

pub fn blacklist_text(entries: &[BlacklistEntry]) -> String {
    if entries.is_empty() {
        return "The blacklist is empty.".to_string();
    }
    let mut lines = vec![format!("Blacklist ({}):", entries.len())];
    for e in entries {
        match e.label.as_deref() {
            Some(label) => lines.push(format!("- {} ({label})", e.user_id)),
            None => lines.push(format!("- {}", e.user_id)),
        }
    }
    lines.join("\n")
}

/// Telegram rejects messages over 4096 characters; stay below that.
pub const TELEGRAM_SAFE_LIMIT: usize = 4000;

/// Split `text` into chunks of at most `limit` characters, on line boundaries
/// where possible. Lines longer than `limit` are cut on char boundaries.
pub fn split_text(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        let needed = if current.is_empty() { line_len } else { line_len + 1 };
        if current_len + needed <= limit {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
            current_len += needed;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len <= limit {
            current.push_str(line);
            current_len = line_len;
            continue;
        }

        let chars: Vec<char> = line.chars().collect();
        for piece in chars.chunks(limit) {
            let piece: String = piece.iter().collect();
            if piece.chars().count() == limit {
                chunks.push(piece);
            } else {
                current_len = piece.chars().count();
                current = piece;
            }
        }
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub fn join_ids<T: std::fmt::Display>(ids: impl Iterator<Item = T>) -> String {
    ids.map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}
