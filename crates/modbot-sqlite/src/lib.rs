//! SQLite implementation of the `modbot_core::storage::Storage` port.

use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqliteConnection, SqlitePool,
};

use modbot_core::{
    domain::{AuditAction, AuditEntry, ChatId, NewAuditEntry, UserId},
    storage::{AuditQuery, Collection, Record, Storage, WriteOutcome},
    Error, Result,
};

fn storage_err(e: impl std::fmt::Display) -> Error {
    Error::Storage(e.to_string())
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

const MAX_CONNECTIONS: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Create the database file if it doesn't already exist.
async fn create_database(url: &str) -> Result<()> {
    if !Sqlite::database_exists(url).await.map_err(storage_err)? {
        Sqlite::create_database(url).await.map_err(storage_err)?;
    }
    Ok(())
}

async fn run_pending_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!().run(pool).await.map_err(storage_err)
}

/// Storage over a SQLite connection pool.
///
/// Keyed writes and their audit entry share one transaction; uniqueness is
/// enforced by the schema.
#[derive(Clone, Debug)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if needed) the database at `url` and apply pending
    /// migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let memory = is_memory_url(url);
        if !memory {
            create_database(url).await?;
        }

        let options = SqliteConnectOptions::from_str(url)
            .map_err(storage_err)?
            .busy_timeout(BUSY_TIMEOUT);

        // An in-memory database lives exactly as long as its connection.
        let pool = if memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
        } else {
            SqlitePoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .connect_with(options)
                .await
        }
        .map_err(storage_err)?;

        run_pending_migrations(&pool).await?;

        tracing::info!(url = %url, "sqlite storage ready");
        Ok(Self { pool })
    }
}

/// `(table, key column)`; both are fixed identifiers, never user input.
fn table(collection: Collection) -> (&'static str, &'static str) {
    match collection {
        Collection::Blacklist => ("blacklist", "telegram_id"),
        Collection::ModeratedChats => ("moderated_chats", "chat_id"),
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    record_key: i64,
    label: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<RecordRow> for Record {
    fn from(row: RecordRow) -> Self {
        Record {
            key: row.record_key,
            label: row.label,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: i64,
    action: String,
    telegram_id: Option<i64>,
    chat_id: Option<i64>,
    details: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = Error;

    fn try_from(row: AuditRow) -> Result<Self> {
        let action = AuditAction::parse(&row.action).ok_or_else(|| {
            Error::Storage(format!("unknown audit action {:?} in row {}", row.action, row.id))
        })?;
        Ok(AuditEntry {
            seq: row.id,
            action,
            user_id: row.telegram_id.map(UserId),
            chat_id: row.chat_id.map(ChatId),
            details: row.details,
            created_at: row.created_at,
        })
    }
}

async fn insert_audit(conn: &mut SqliteConnection, entry: NewAuditEntry) -> Result<AuditEntry> {
    let stored = entry.stored(0, Utc::now());
    let res = sqlx::query(
        "INSERT INTO audit_log (action, telegram_id, chat_id, details, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(stored.action.as_str())
    .bind(stored.user_id.map(|u| u.0))
    .bind(stored.chat_id.map(|c| c.0))
    .bind(stored.details.as_deref())
    .bind(stored.created_at)
    .execute(&mut *conn)
    .await
    .map_err(storage_err)?;

    Ok(AuditEntry {
        seq: res.last_insert_rowid(),
        ..stored
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn insert(
        &self,
        collection: Collection,
        record: Record,
        audit: Option<NewAuditEntry>,
    ) -> Result<WriteOutcome> {
        let (table, key) = table(collection);
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let res = sqlx::query(&format!(
            "INSERT INTO {table} ({key}, label, created_at) VALUES (?, ?, ?)
             ON CONFLICT({key}) DO NOTHING"
        ))
        .bind(record.key)
        .bind(record.label.as_deref())
        .bind(record.created_at)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        if res.rows_affected() == 0 {
            tx.rollback().await.map_err(storage_err)?;
            return Ok(WriteOutcome::Unchanged);
        }

        let entry = match audit {
            Some(a) => Some(insert_audit(&mut *tx, a).await?),
            None => None,
        };
        tx.commit().await.map_err(storage_err)?;
        Ok(WriteOutcome::Applied(entry))
    }

    async fn delete(
        &self,
        collection: Collection,
        key_value: i64,
        audit: Option<NewAuditEntry>,
    ) -> Result<WriteOutcome> {
        let (table, key) = table(collection);
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let res = sqlx::query(&format!("DELETE FROM {table} WHERE {key} = ?"))
            .bind(key_value)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        if res.rows_affected() == 0 {
            tx.rollback().await.map_err(storage_err)?;
            return Ok(WriteOutcome::Unchanged);
        }

        let entry = match audit {
            Some(a) => Some(insert_audit(&mut *tx, a).await?),
            None => None,
        };
        tx.commit().await.map_err(storage_err)?;
        Ok(WriteOutcome::Applied(entry))
    }

    async fn contains(&self, collection: Collection, key_value: i64) -> Result<bool> {
        let (table, key) = table(collection);
        let found: Option<i64> =
            sqlx::query_scalar(&format!("SELECT 1 FROM {table} WHERE {key} = ? LIMIT 1"))
                .bind(key_value)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_err)?;
        Ok(found.is_some())
    }

    async fn records(&self, collection: Collection) -> Result<Vec<Record>> {
        let (table, key) = table(collection);
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {key} AS record_key, label, created_at FROM {table} ORDER BY {key} ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(rows.into_iter().map(Record::from).collect())
    }

    async fn keys(&self, collection: Collection) -> Result<Vec<i64>> {
        let (table, key) = table(collection);
        sqlx::query_scalar(&format!("SELECT {key} FROM {table} ORDER BY {key} ASC"))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        let (table, _) = table(collection);
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(n as u64)
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        insert_audit(&mut *conn, entry).await
    }

    async fn audit_count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(n as u64)
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        // LIMIT -1 means no limit in SQLite.
        let limit = query
            .limit
            .map(|n| i64::try_from(n).unwrap_or(i64::MAX))
            .unwrap_or(-1);
        let rows: Vec<AuditRow> = sqlx::query_as(
            "SELECT id, action, telegram_id, chat_id, details, created_at
             FROM audit_log
             WHERE (?1 IS NULL OR action = ?1)
               AND (?2 IS NULL OR chat_id = ?2)
             ORDER BY created_at DESC, id DESC
             LIMIT ?3",
        )
        .bind(query.action.map(AuditAction::as_str))
        .bind(query.chat_id.map(|c| c.0))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.into_iter().map(AuditEntry::try_from).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn storage() -> SqliteStorage {
        SqliteStorage::connect("sqlite::memory:").await.unwrap()
    }

    fn record(key: i64) -> Record {
        Record {
            key,
            label: Some(format!("user {key}")),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_is_idempotent_and_carries_audit() {
        let s = storage().await;
        let audit = NewAuditEntry::new(AuditAction::Add).user(UserId(7));

        let first = s
            .insert(Collection::Blacklist, record(7), Some(audit.clone()))
            .await
            .unwrap();
        let WriteOutcome::Applied(Some(entry)) = first else {
            panic!("expected applied write, got {first:?}");
        };
        assert_eq!(entry.user_id, Some(UserId(7)));
        assert!(entry.seq > 0);

        let second = s
            .insert(Collection::Blacklist, record(7), Some(audit))
            .await
            .unwrap();
        assert_eq!(second, WriteOutcome::Unchanged);
        assert_eq!(s.audit_count().await.unwrap(), 1);
        assert_eq!(s.count(Collection::Blacklist).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn collections_are_independent() {
        let s = storage().await;
        s.insert(Collection::Blacklist, record(5), None).await.unwrap();
        s.insert(Collection::ModeratedChats, record(-5), None)
            .await
            .unwrap();

        assert!(s.contains(Collection::Blacklist, 5).await.unwrap());
        assert!(!s.contains(Collection::Blacklist, -5).await.unwrap());
        assert_eq!(s.keys(Collection::ModeratedChats).await.unwrap(), vec![-5]);
    }

    #[tokio::test]
    async fn records_are_sorted_and_keep_labels() {
        let s = storage().await;
        for key in [30, 10, 20] {
            s.insert(Collection::Blacklist, record(key), None)
                .await
                .unwrap();
        }
        let rows = s.records(Collection::Blacklist).await.unwrap();
        let keys: Vec<i64> = rows.iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![10, 20, 30]);
        assert_eq!(rows[0].label.as_deref(), Some("user 10"));
    }

    #[tokio::test]
    async fn delete_of_missing_key_writes_nothing() {
        let s = storage().await;
        let audit = NewAuditEntry::new(AuditAction::Remove).user(UserId(1));
        let out = s
            .delete(Collection::Blacklist, 1, Some(audit.clone()))
            .await
            .unwrap();
        assert_eq!(out, WriteOutcome::Unchanged);
        assert_eq!(s.audit_count().await.unwrap(), 0);

        s.insert(Collection::Blacklist, record(1), None).await.unwrap();
        let out = s
            .delete(Collection::Blacklist, 1, Some(audit))
            .await
            .unwrap();
        assert!(out.applied());
        assert!(!s.contains(Collection::Blacklist, 1).await.unwrap());
        assert_eq!(s.audit_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn audit_query_filters_and_orders_newest_first() {
        let s = storage().await;
        let at = |h| Utc.with_ymd_and_hms(2026, 1, 2, h, 0, 0).unwrap();

        s.append_audit(NewAuditEntry::new(AuditAction::Add).user(UserId(1)).at(at(1)))
            .await
            .unwrap();
        s.append_audit(
            NewAuditEntry::new(AuditAction::Check)
                .chat(ChatId(-100))
                .details("checked 1 users, removed 1")
                .at(at(3)),
        )
        .await
        .unwrap();
        s.append_audit(NewAuditEntry::new(AuditAction::Check).chat(ChatId(-200)).at(at(2)))
            .await
            .unwrap();

        let all = s.query_audit(&AuditQuery::default()).await.unwrap();
        let hours: Vec<DateTime<Utc>> = all.iter().map(|e| e.created_at).collect();
        assert_eq!(hours, vec![at(3), at(2), at(1)]);

        let checks = s
            .query_audit(&AuditQuery {
                action: Some(AuditAction::Check),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(checks.len(), 2);

        let one_chat = s
            .query_audit(&AuditQuery {
                chat_id: Some(ChatId(-100)),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(one_chat.len(), 1);
        assert_eq!(one_chat[0].details.as_deref(), Some("checked 1 users, removed 1"));

        let limited = s
            .query_audit(&AuditQuery {
                limit: Some(1),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].created_at, at(3));
    }

    #[tokio::test]
    async fn concurrent_inserts_apply_once() {
        let s = storage().await;
        let mut handles = Vec::new();
        for _ in 0..8 {
            let s = s.clone();
            handles.push(tokio::spawn(async move {
                s.insert(
                    Collection::Blacklist,
                    record(42),
                    Some(NewAuditEntry::new(AuditAction::Add).user(UserId(42))),
                )
                .await
                .unwrap()
                .applied()
            }));
        }
        let mut applied = 0;
        for h in handles {
            if h.await.unwrap() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
        assert_eq!(s.audit_count().await.unwrap(), 1);
    }

    mod services {
        use std::sync::{Arc, Mutex};

        use async_trait::async_trait;
        use modbot_core::{
            audit::AuditLog,
            blacklist::{BlacklistStats, BlacklistStore},
            errors::{ActionError, ActionResult},
            messaging::port::ChatClient,
            reconcile::{Reconciler, SweepOptions},
            registry::ChatRegistry,
        };

        use super::*;

        struct FlakyChat {
            attempted: Mutex<Vec<UserId>>,
        }

        #[async_trait]
        impl ChatClient for FlakyChat {
            async fn remove_member(&self, _chat_id: ChatId, user_id: UserId) -> ActionResult {
                self.attempted.lock().unwrap().push(user_id);
                if user_id == UserId(222) {
                    return Err(ActionError::NotMember("user not found".into()));
                }
                Ok(())
            }

            async fn list_administrators(&self, _chat_id: ChatId) -> ActionResult<Vec<UserId>> {
                Ok(vec![])
            }

            async fn send_message(&self, _chat_id: ChatId, _text: &str) -> ActionResult {
                Ok(())
            }
        }

        async fn services() -> (BlacklistStore, ChatRegistry, AuditLog) {
            let storage: Arc<dyn Storage> = Arc::new(storage().await);
            let audit = AuditLog::new(storage.clone());
            (
                BlacklistStore::new(storage.clone(), audit.clone()),
                ChatRegistry::new(storage),
                audit,
            )
        }

        #[tokio::test]
        async fn blacklist_contract_holds_on_sqlite() {
            let (blacklist, registry, _) = services().await;
            assert_eq!(blacklist.stats().await.unwrap(), BlacklistStats::default());

            assert!(blacklist.add(UserId(222), None).await.unwrap());
            assert!(blacklist.add(UserId(111), Some("spam".into())).await.unwrap());
            assert!(!blacklist.add(UserId(111), None).await.unwrap());
            assert_eq!(blacklist.list_all().await.unwrap(), vec![UserId(111), UserId(222)]);

            assert!(!blacklist.remove(UserId(5)).await.unwrap());
            let stats = blacklist.stats().await.unwrap();
            assert_eq!((stats.count, stats.total_actions), (2, 2));

            assert!(registry.register(ChatId(-1), None).await.unwrap());
            assert!(!registry.register(ChatId(-1), None).await.unwrap());
            assert_eq!(registry.list_all().await.unwrap(), vec![ChatId(-1)]);
        }

        #[tokio::test]
        async fn partial_sweep_writes_one_check_entry() {
            let (blacklist, _, audit) = services().await;
            blacklist.add(UserId(111), None).await.unwrap();
            blacklist.add(UserId(222), None).await.unwrap();

            let client = Arc::new(FlakyChat {
                attempted: Mutex::new(Vec::new()),
            });
            let reconciler = Reconciler::new(
                blacklist.clone(),
                audit.clone(),
                client.clone(),
                SweepOptions::default(),
            );
            let report = reconciler.sweep(ChatId(-100)).await.unwrap();
            assert_eq!(report.succeeded, vec![UserId(111)]);
            assert_eq!(report.failed_ids(), vec![UserId(222)]);
            assert_eq!(client.attempted.lock().unwrap().len(), 2);

            let checks = audit
                .query(Some(AuditAction::Check), Some(ChatId(-100)), None)
                .await
                .unwrap();
            assert_eq!(checks.len(), 1);
            assert_eq!(checks[0].details.as_deref(), Some("checked 2 users, removed 1"));
            assert_eq!(blacklist.stats().await.unwrap().total_actions, 3);
        }
    }

    #[tokio::test]
    async fn file_database_survives_reconnect() {
        let path = std::env::temp_dir().join(format!("modbot-sqlite-{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let url = format!("sqlite://{}", path.display());

        let s = SqliteStorage::connect(&url).await.unwrap();
        s.insert(Collection::Blacklist, record(3), None).await.unwrap();
        s.close().await;

        let s = SqliteStorage::connect(&url).await.unwrap();
        assert!(s.contains(Collection::Blacklist, 3).await.unwrap());
        s.close().await;
        let _ = std::fs::remove_file(&path);
    }
}
