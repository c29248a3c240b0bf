//! Periodic sweeps over every moderated chat.
//!
//! The chat set is the union of `MODERATED_CHAT_IDS` and the runtime registry,
//! recomputed on every run. A failing chat never stops the others.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use chrono::{DateTime, TimeZone, Utc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{ChatId, UserId},
    errors::{ActionError, ActionResult},
    formatting::{admin_copy, sweep_report_text},
    messaging::port::{send_text, ChatClient},
    reconcile::{Reconciler, SweepReport},
    registry::ChatRegistry,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepSchedule {
    /// Fixed interval; the first sweep runs one interval after start.
    Every(Duration),
    /// Once a day at `hour:00` UTC.
    DailyAtUtc { hour: u32 },
}

impl SweepSchedule {
    /// How long to wait from `now` until the next sweep.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        match *self {
            SweepSchedule::Every(interval) => interval,
            SweepSchedule::DailyAtUtc { hour } => {
                let Some(today) = now.date_naive().and_hms_opt(hour, 0, 0) else {
                    return Duration::from_secs(86_400);
                };
                let mut next = Utc.from_utc_datetime(&today);
                if next <= now {
                    next += chrono::Duration::days(1);
                }
                (next - now).to_std().unwrap_or_default()
            }
        }
    }
}

/// Outcome of one chat within a scheduled run.
#[derive(Debug)]
pub struct ChatSweep {
    pub chat_id: ChatId,
    pub outcome: Result<SweepReport>,
}

#[derive(Clone)]
pub struct SweepScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    reconciler: Reconciler,
    registry: ChatRegistry,
    client: Arc<dyn ChatClient>,
    static_chats: Vec<ChatId>,
    admins: Vec<UserId>,
    schedule: SweepSchedule,
    /// Upper bound for delivering one report to one recipient.
    send_timeout: Duration,
}

impl SweepScheduler {
    pub fn new(
        reconciler: Reconciler,
        registry: ChatRegistry,
        client: Arc<dyn ChatClient>,
        static_chats: Vec<ChatId>,
        admins: Vec<UserId>,
        schedule: SweepSchedule,
        send_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                reconciler,
                registry,
                client,
                static_chats,
                admins,
                schedule,
                send_timeout,
            }),
        }
    }

    /// Static and registered chats, deduplicated and ascending.
    ///
    /// If the registry cannot be read the static chats are still returned.
    pub async fn chats(&self) -> Vec<ChatId> {
        let mut all: BTreeSet<ChatId> = self.inner.static_chats.iter().copied().collect();
        match self.inner.registry.list_all().await {
            Ok(registered) => all.extend(registered),
            Err(e) => tracing::error!("scheduler: cannot read chat registry: {e}"),
        }
        all.into_iter().collect()
    }

    /// Sweep every chat once and deliver the reports.
    pub async fn run_once(&self) -> Vec<ChatSweep> {
        let chats = self.chats().await;
        if chats.is_empty() {
            tracing::info!("scheduler: no moderated chats");
            return Vec::new();
        }
        tracing::info!(chats = chats.len(), "scheduler: sweeping");

        let mut out = Vec::with_capacity(chats.len());
        for chat_id in chats {
            let outcome = self.inner.reconciler.sweep(chat_id).await;
            match &outcome {
                Ok(report) => self.deliver(chat_id, &sweep_report_text(report)).await,
                Err(e) => {
                    tracing::error!(chat_id = chat_id.0, "scheduler: sweep failed: {e}");
                    let text = admin_copy(chat_id, &format!("Scheduled check failed: {e}"));
                    self.notify_admins(&text).await;
                }
            }
            out.push(ChatSweep { chat_id, outcome });
        }
        out
    }

    /// Run until `cancel` fires. A sweep in progress is abandoned on cancellation.
    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    }

    async fn run(&self, cancel: CancellationToken) {
        tracing::info!(schedule = ?self.inner.schedule, "scheduler: started");
        loop {
            let wait = self.inner.schedule.delay_from(Utc::now());
            tracing::debug!("scheduler: next sweep in {wait:?}");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(wait) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.run_once() => {}
                    }
                }
            }
        }
        tracing::info!("scheduler: stopped");
    }

    async fn deliver(&self, chat_id: ChatId, text: &str) {
        if let Err(e) = self.send(chat_id, text).await {
            tracing::warn!(chat_id = chat_id.0, "scheduler: cannot post report to chat: {e}");
        }
        self.notify_admins(&admin_copy(chat_id, text)).await;
    }

    async fn notify_admins(&self, text: &str) {
        for admin in &self.inner.admins {
            if let Err(e) = self.send(ChatId(admin.0), text).await {
                tracing::warn!(admin_id = admin.0, "scheduler: cannot notify admin: {e}");
            }
        }
    }

    async fn send(&self, chat_id: ChatId, text: &str) -> ActionResult {
        let limit = self.inner.send_timeout;
        timeout(limit, send_text(self.inner.client.as_ref(), chat_id, text))
            .await
            .unwrap_or(Err(ActionError::Timeout(limit)))
    }
}
