use std::{env, path::PathBuf, time::Duration};

use crate::{errors::Error, scheduler::SweepSchedule, Result};

pub const MEMORY_DATABASE_URL: &str = "memory";

/// Typed configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bot_token: String,
    /// Users allowed to run admin commands; also receive sweep reports.
    pub admin_ids: Vec<i64>,
    /// SQLite URL, or `memory` for the in-process backend.
    pub database_url: String,

    // Sweeps
    pub moderated_chat_ids: Vec<i64>,
    pub sweep_schedule: SweepSchedule,
    pub sweep_concurrency: usize,
    pub sweep_call_timeout: Duration,

    // Audit
    pub audit_log_path: Option<PathBuf>,
    pub audit_log_json: bool,
}

impl Config {
    /// Load from the process environment after reading `.env` (existing variables win).
    pub fn load() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("no .env loaded: {e}");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_str = |key: &str| lookup(key).map(|s| s.trim().to_string());

        let bot_token = env_str("BOT_TOKEN").unwrap_or_default();
        if bot_token.is_empty() {
            return Err(Error::Config(
                "BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let admin_ids = parse_csv_i64("ADMIN_IDS", env_str("ADMIN_IDS"));
        if admin_ids.is_empty() {
            tracing::warn!("ADMIN_IDS is empty: nobody can run admin commands");
        }

        let database_url = env_str("DATABASE_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| "sqlite://modbot.db".to_string());

        let moderated_chat_ids =
            parse_csv_i64("MODERATED_CHAT_IDS", env_str("MODERATED_CHAT_IDS"));

        let sweep_schedule = match env_str("SWEEP_AT_UTC_HOUR").and_then(non_empty) {
            Some(raw) => {
                let hour = raw.parse::<u32>().ok().filter(|h| *h < 24).ok_or_else(|| {
                    Error::Config(format!("SWEEP_AT_UTC_HOUR must be 0-23, got {raw:?}"))
                })?;
                SweepSchedule::DailyAtUtc { hour }
            }
            None => {
                let secs = parse_u64(env_str("SWEEP_INTERVAL_SECS")).unwrap_or(86_400);
                if secs == 0 {
                    return Err(Error::Config(
                        "SWEEP_INTERVAL_SECS must be positive".to_string(),
                    ));
                }
                SweepSchedule::Every(Duration::from_secs(secs))
            }
        };
        let sweep_concurrency = parse_u64(env_str("SWEEP_CONCURRENCY"))
            .map(|n| n.max(1) as usize)
            .unwrap_or(4);
        let sweep_call_timeout =
            Duration::from_millis(parse_u64(env_str("SWEEP_CALL_TIMEOUT_MS")).unwrap_or(10_000));

        let audit_log_path = env_str("AUDIT_LOG_PATH")
            .and_then(non_empty)
            .map(PathBuf::from);
        let audit_log_json = env_str("AUDIT_LOG_JSON")
            .map(|s| parse_bool(&s))
            .unwrap_or(false);

        Ok(Self {
            bot_token,
            admin_ids,
            database_url,
            moderated_chat_ids,
            sweep_schedule,
            sweep_concurrency,
            sweep_call_timeout,
            audit_log_path,
            audit_log_json,
        })
    }

    pub fn uses_memory_storage(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_u64(v: Option<String>) -> Option<u64> {
    v.and_then(|s| s.parse::<u64>().ok())
}

fn parse_csv_i64(name: &str, v: Option<String>) -> Vec<i64> {
    let mut out = Vec::new();
    for chunk in v.unwrap_or_default().split(',').map(str::trim) {
        if chunk.is_empty() {
            continue;
        }
        match chunk.parse::<i64>() {
            Ok(id) => out.push(id),
            Err(_) => tracing::warn!("{name}: skipping malformed id {chunk:?}"),
        }
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
