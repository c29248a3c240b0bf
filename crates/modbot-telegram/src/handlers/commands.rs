use modbot_core::{
    domain::{ChatId, UserId},
    formatting::{blacklist_text, join_ids, stats_text, sweep_report_text},
    Error,
};

use crate::router::AppState;

use super::is_admin;

const DEFAULT_LOG_ENTRIES: usize = 10;
const MAX_LOG_ENTRIES: usize = 50;

const HELP: &str = "Blacklist moderation bot.\n\n\
Commands (admins only):\n\
/adduser <id> [label] - blacklist a user (or reply to their message)\n\
/deluser <id> - remove a user from the blacklist (or reply)\n\
/blacklist - list blacklisted users\n\
/stats - blacklist statistics\n\
/force_check - check this chat now\n\
/addchat [id] - add this (or the given) chat to scheduled checks\n\
/delchat [id] - remove this (or the given) chat from scheduled checks\n\
/chats - list moderated chats\n\
/log [n] - last n audit entries (default 10, max 50)";

/// Author of the message an admin replied to.
#[derive(Clone, Debug)]
pub struct ReplyTarget {
    pub user_id: UserId,
    pub username: Option<String>,
}

/// One incoming text message, stripped of Telegram types.
#[derive(Clone, Debug)]
pub struct Invocation<'a> {
    pub chat_id: ChatId,
    pub is_private: bool,
    pub sender: Option<UserId>,
    pub text: &'a str,
    pub reply_to: Option<ReplyTarget>,
}

pub(crate) fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// Target user of `/adduser` and `/deluser`.
///
/// When the command replies to a message its author is the target, labelled
/// with their username, and any argument is ignored.
fn user_target(
    arg: &str,
    reply_to: Option<&ReplyTarget>,
) -> Result<(UserId, Option<String>), String> {
    if let Some(t) = reply_to {
        return Ok((t.user_id, t.username.clone()));
    }
    let mut parts = arg.splitn(2, char::is_whitespace);
    let raw = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "You need to specify a user id.".to_string())?;
    let id = raw
        .parse::<i64>()
        .map_err(|_| "The id must be a number.".to_string())?;
    let label = parts
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Ok((UserId(id), label))
}

fn chat_target(arg: &str, inv: &Invocation<'_>) -> Result<ChatId, String> {
    match arg.split_whitespace().next() {
        Some(raw) => raw
            .parse::<i64>()
            .map(ChatId)
            .map_err(|_| "The chat id must be a number.".to_string()),
        None if inv.is_private => {
            Err("Run this command in a group chat or pass a chat id.".to_string())
        }
        None => Ok(inv.chat_id),
    }
}

fn log_limit(arg: &str) -> Result<usize, String> {
    match arg.split_whitespace().next() {
        None => Ok(DEFAULT_LOG_ENTRIES),
        Some(raw) => raw
            .parse::<usize>()
            .map(|n| n.clamp(1, MAX_LOG_ENTRIES))
            .map_err(|_| "The count must be a number.".to_string()),
    }
}

fn or_none(ids: String) -> String {
    if ids.is_empty() {
        "none".to_string()
    } else {
        ids
    }
}

fn storage_failure(cmd: &str, e: Error) -> String {
    tracing::error!("/{cmd} failed: {e}");
    "Storage error, nothing was changed. Try again later.".to_string()
}

/// Run one message through the command set and return the reply, if any.
pub async fn execute(state: &AppState, inv: Invocation<'_>) -> Option<String> {
    let admin = is_admin(inv.sender, &state.cfg.admin_ids);

    if !inv.text.starts_with('/') {
        // Hint only in private chats; group chatter is not ours to answer.
        return (admin && inv.is_private)
            .then(|| "Send /help to see the available commands.".to_string());
    }

    let (cmd, arg) = parse_command(inv.text);
    if !admin {
        tracing::info!(
            user_id = inv.sender.map(|u| u.0),
            chat_id = inv.chat_id.0,
            "rejected /{cmd} from non-admin"
        );
        return Some("Admins only.".to_string());
    }

    let m = &state.moderation;
    let reply = match cmd.as_str() {
        "start" | "help" => HELP.to_string(),

        "adduser" => match user_target(&arg, inv.reply_to.as_ref()) {
            Err(msg) => msg,
            Ok((user_id, label)) => match m.blacklist().add(user_id, label).await {
                Ok(true) => format!("User {user_id} added to the blacklist."),
                Ok(false) => format!("User {user_id} is already blacklisted."),
                Err(e) => storage_failure(&cmd, e),
            },
        },

        "deluser" => match user_target(&arg, inv.reply_to.as_ref()) {
            Err(msg) => msg,
            Ok((user_id, _)) => match m.blacklist().remove(user_id).await {
                Ok(true) => format!("User {user_id} removed from the blacklist."),
                Ok(false) => format!("User {user_id} is not blacklisted."),
                Err(e) => storage_failure(&cmd, e),
            },
        },

        "stats" => match m.blacklist().stats().await {
            Ok(stats) => stats_text(&stats),
            Err(e) => storage_failure(&cmd, e),
        },

        "blacklist" => match m.blacklist().entries().await {
            Ok(entries) => blacklist_text(&entries),
            Err(e) => storage_failure(&cmd, e),
        },

        "force_check" => {
            if inv.is_private {
                "Run /force_check in the group chat you want to check.".to_string()
            } else {
                match m.reconciler().sweep(inv.chat_id).await {
                    Ok(report) => sweep_report_text(&report),
                    Err(e) => {
                        tracing::error!(chat_id = inv.chat_id.0, "/force_check failed: {e}");
                        format!("Check failed: {e}")
                    }
                }
            }
        }

        "addchat" => match chat_target(&arg, &inv) {
            Err(msg) => msg,
            Ok(chat_id) => match m.registry().register(chat_id, None).await {
                Ok(true) => format!("Chat {chat_id} will be checked on schedule."),
                Ok(false) => format!("Chat {chat_id} is already registered."),
                Err(e) => storage_failure(&cmd, e),
            },
        },

        "delchat" => match chat_target(&arg, &inv) {
            Err(msg) => msg,
            Ok(chat_id) => match m.registry().deregister(chat_id).await {
                Ok(true) => format!("Chat {chat_id} removed from scheduled checks."),
                Ok(false) => format!("Chat {chat_id} is not registered."),
                Err(e) => storage_failure(&cmd, e),
            },
        },

        "chats" => match m.registry().list_all().await {
            Ok(registered) => {
                let fixed = &state.cfg.moderated_chat_ids;
                if fixed.is_empty() && registered.is_empty() {
                    "No moderated chats.".to_string()
                } else {
                    let from_config = or_none(join_ids(fixed.iter()));
                    let registered = or_none(join_ids(registered.iter()));
                    format!(
                        "Moderated chats:\n- from config: {from_config}\n- registered: {registered}"
                    )
                }
            }
            Err(e) => storage_failure(&cmd, e),
        },

        "log" => match log_limit(&arg) {
            Err(msg) => msg,
            Ok(limit) => match m.audit().query(None, None, Some(limit)).await {
                Ok(entries) if entries.is_empty() => "The audit log is empty.".to_string(),
                Ok(entries) => {
                    let mut lines = vec![format!("Last {} audit entries:", entries.len())];
                    lines.extend(entries.iter().map(|e| format!("- {}", e.summary())));
                    lines.join("\n")
                }
                Err(e) => storage_failure(&cmd, e),
            },
        },

        _ => "Unknown command. Send /help for the list.".to_string(),
    };
    Some(reply)
}
