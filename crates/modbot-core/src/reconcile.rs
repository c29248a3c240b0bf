//! One sweep over a chat: ban every blacklisted user, record what happened.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use tokio::{sync::Semaphore, task::JoinSet, time::timeout};

use crate::{
    audit::AuditLog,
    blacklist::BlacklistStore,
    domain::{AuditAction, ChatId, NewAuditEntry, UserId},
    errors::{ActionError, ActionResult},
    messaging::port::ChatClient,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct SweepOptions {
    /// Maximum number of removal calls in flight.
    pub concurrency: usize,
    /// Upper bound for each chat-client call.
    pub call_timeout: Duration,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            call_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedRemoval {
    pub user_id: UserId,
    pub error: ActionError,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepReport {
    pub chat_id: ChatId,
    /// Size of the blacklist snapshot the sweep worked from.
    pub checked: usize,
    pub succeeded: Vec<UserId>,
    pub failed: Vec<FailedRemoval>,
    /// Blacklisted chat administrators; the platform refuses to ban them.
    pub skipped: Vec<UserId>,
}

impl SweepReport {
    pub fn failed_ids(&self) -> Vec<UserId> {
        self.failed.iter().map(|f| f.user_id).collect()
    }
}

#[derive(Clone)]
pub struct Reconciler {
    blacklist: BlacklistStore,
    audit: AuditLog,
    client: Arc<dyn ChatClient>,
    opts: SweepOptions,
}

impl Reconciler {
    pub fn new(
        blacklist: BlacklistStore,
        audit: AuditLog,
        client: Arc<dyn ChatClient>,
        opts: SweepOptions,
    ) -> Self {
        Self {
            blacklist,
            audit,
            client,
            opts,
        }
    }

    /// Sweep `chat_id` against a fresh blacklist snapshot.
    ///
    /// Chat-client failures are collected in the report. Only storage errors
    /// (reading the snapshot, appending the `check` entry) are returned as `Err`.
    pub async fn sweep(&self, chat_id: ChatId) -> Result<SweepReport> {
        let snapshot = self.blacklist.list_all().await?;
        tracing::info!(chat_id = chat_id.0, users = snapshot.len(), "sweep: started");

        let admins = if snapshot.is_empty() {
            HashSet::new()
        } else {
            self.administrators(chat_id).await
        };
        let (skipped, targets): (Vec<UserId>, Vec<UserId>) =
            snapshot.iter().copied().partition(|u| admins.contains(u));

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (user_id, res) in self.remove_all(chat_id, targets).await {
            match res {
                Ok(()) => succeeded.push(user_id),
                Err(error) => {
                    tracing::warn!(
                        chat_id = chat_id.0,
                        user_id = user_id.0,
                        "sweep: removal failed: {error}"
                    );
                    failed.push(FailedRemoval { user_id, error });
                }
            }
        }
        succeeded.sort();
        failed.sort_by_key(|f| f.user_id);

        let details = format!(
            "checked {} users, removed {}",
            snapshot.len(),
            succeeded.len()
        );
        self.audit
            .append(
                NewAuditEntry::new(AuditAction::Check)
                    .chat(chat_id)
                    .details(details),
            )
            .await?;

        tracing::info!(
            chat_id = chat_id.0,
            removed = succeeded.len(),
            failed = failed.len(),
            skipped = skipped.len(),
            "sweep: completed"
        );

        Ok(SweepReport {
            chat_id,
            checked: snapshot.len(),
            succeeded,
            failed,
            skipped,
        })
    }

    /// Best-effort admin lookup; failure means "no known administrators".
    async fn administrators(&self, chat_id: ChatId) -> HashSet<UserId> {
        let res = timeout(
            self.opts.call_timeout,
            self.client.list_administrators(chat_id),
        )
        .await
        .unwrap_or(Err(ActionError::Timeout(self.opts.call_timeout)));

        match res {
            Ok(admins) => admins.into_iter().collect(),
            Err(e) => {
                tracing::warn!(chat_id = chat_id.0, "sweep: admin lookup failed: {e}");
                HashSet::new()
            }
        }
    }

    async fn remove_all(
        &self,
        chat_id: ChatId,
        targets: Vec<UserId>,
    ) -> Vec<(UserId, ActionResult)> {
        let permits = Arc::new(Semaphore::new(self.opts.concurrency.max(1)));
        let call_timeout = self.opts.call_timeout;

        let mut tasks = JoinSet::new();
        let mut task_users = HashMap::new();
        for user_id in targets {
            let client = self.client.clone();
            let permits = permits.clone();
            let handle = tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                timeout(call_timeout, client.remove_member(chat_id, user_id))
                    .await
                    .unwrap_or(Err(ActionError::Timeout(call_timeout)))
            });
            task_users.insert(handle.id(), user_id);
        }

        let mut out = Vec::with_capacity(task_users.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, res)) => {
                    if let Some(user_id) = task_users.get(&id) {
                        out.push((*user_id, res));
                    }
                }
                Err(e) => {
                    if let Some(user_id) = task_users.get(&e.id()) {
                        out.push((*user_id, Err(ActionError::Failed(e.to_string()))));
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, Storage};
    use async_trait::async_trait;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    #[derive(Default)]
    struct FakeChat {
        fail: HashMap<i64, ActionError>,
        admins: Vec<i64>,
        admin_lookup_fails: bool,
        slow: HashSet<i64>,
        removed: Mutex<Vec<(ChatId, UserId)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl ChatClient for FakeChat {
        async fn remove_member(&self, chat_id: ChatId, user_id: UserId) -> ActionResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let wait = if self.slow.contains(&user_id.0) {
                Duration::from_secs(3600)
            } else {
                Duration::from_millis(10)
            };
            tokio::time::sleep(wait).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(e) = self.fail.get(&user_id.0) {
                return Err(e.clone());
            }
            self.removed.lock().unwrap().push((chat_id, user_id));
            Ok(())
        }

        async fn list_administrators(&self, _chat_id: ChatId) -> ActionResult<Vec<UserId>> {
            if self.admin_lookup_fails {
                return Err(ActionError::PermissionDenied("not an admin".into()));
            }
            Ok(self.admins.iter().copied().map(UserId).collect())
        }

        async fn send_message(&self, _chat_id: ChatId, _text: &str) -> ActionResult {
            Ok(())
        }
    }

    struct Fixture {
        blacklist: BlacklistStore,
        audit: AuditLog,
    }

    fn fixture() -> Fixture {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let audit = AuditLog::new(storage.clone());
        Fixture {
            blacklist: BlacklistStore::new(storage, audit.clone()),
            audit,
        }
    }

    fn reconciler(f: &Fixture, chat: Arc<FakeChat>, opts: SweepOptions) -> Reconciler {
        Reconciler::new(f.blacklist.clone(), f.audit.clone(), chat, opts)
    }

    #[tokio::test]
    async fn partial_failure_is_reported_not_fatal() {
        let f = fixture();
        f.blacklist.add(UserId(111), None).await.unwrap();
        f.blacklist.add(UserId(222), None).await.unwrap();

        let chat = Arc::new(FakeChat {
            fail: HashMap::from([(222, ActionError::Failed("Bad Request".into()))]),
            ..FakeChat::default()
        });
        let before = f.audit.count().await.unwrap();
        let report = reconciler(&f, chat, SweepOptions::default())
            .sweep(ChatId(-1))
            .await
            .unwrap();

        assert_eq!(report.succeeded, vec![UserId(111)]);
        assert_eq!(report.failed_ids(), vec![UserId(222)]);
        assert_eq!(report.checked, 2);

        assert_eq!(f.audit.count().await.unwrap(), before + 1);
        let checks = f
            .audit
            .query(Some(AuditAction::Check), Some(ChatId(-1)), None)
            .await
            .unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(
            checks[0].details.as_deref(),
            Some("checked 2 users, removed 1")
        );
    }

    #[tokio::test]
    async fn empty_blacklist_still_records_check() {
        let f = fixture();
        let chat = Arc::new(FakeChat::default());
        let report = reconciler(&f, chat, SweepOptions::default())
            .sweep(ChatId(-7))
            .await
            .unwrap();

        assert!(report.succeeded.is_empty() && report.failed.is_empty());
        let last = f.audit.most_recent().await.unwrap().unwrap();
        assert_eq!(last.action, AuditAction::Check);
        assert_eq!(last.details.as_deref(), Some("checked 0 users, removed 0"));
    }

    #[tokio::test]
    async fn administrators_are_skipped() {
        let f = fixture();
        f.blacklist.add(UserId(1), None).await.unwrap();
        f.blacklist.add(UserId(2), None).await.unwrap();

        let chat = Arc::new(FakeChat {
            admins: vec![2],
            ..FakeChat::default()
        });
        let report = reconciler(&f, chat.clone(), SweepOptions::default())
            .sweep(ChatId(-1))
            .await
            .unwrap();

        assert_eq!(report.succeeded, vec![UserId(1)]);
        assert_eq!(report.skipped, vec![UserId(2)]);
        assert_eq!(chat.removed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_admin_lookup_does_not_block_removals() {
        let f = fixture();
        f.blacklist.add(UserId(1), None).await.unwrap();

        let chat = Arc::new(FakeChat {
            admin_lookup_fails: true,
            ..FakeChat::default()
        });
        let report = reconciler(&f, chat, SweepOptions::default())
            .sweep(ChatId(-1))
            .await
            .unwrap();
        assert_eq!(report.succeeded, vec![UserId(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out_without_blocking_others() {
        let f = fixture();
        for id in [1, 2, 3] {
            f.blacklist.add(UserId(id), None).await.unwrap();
        }

        let chat = Arc::new(FakeChat {
            slow: HashSet::from([2]),
            ..FakeChat::default()
        });
        let opts = SweepOptions {
            concurrency: 2,
            call_timeout: Duration::from_secs(5),
        };
        let report = reconciler(&f, chat, opts).sweep(ChatId(-1)).await.unwrap();

        assert_eq!(report.succeeded, vec![UserId(1), UserId(3)]);
        assert_eq!(
            report.failed,
            vec![FailedRemoval {
                user_id: UserId(2),
                error: ActionError::Timeout(Duration::from_secs(5)),
            }]
        );
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let f = fixture();
        for id in 1..=12 {
            f.blacklist.add(UserId(id), None).await.unwrap();
        }

        let chat = Arc::new(FakeChat::default());
        let opts = SweepOptions {
            concurrency: 3,
            call_timeout: Duration::from_secs(5),
        };
        let report = reconciler(&f, chat.clone(), opts)
            .sweep(ChatId(-1))
            .await
            .unwrap();

        assert_eq!(report.succeeded.len(), 12);
        assert!(chat.max_in_flight.load(Ordering::SeqCst) <= 3);
    }
}
