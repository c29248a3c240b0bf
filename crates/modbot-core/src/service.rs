//! Wiring of the core services over one storage backend and one chat client.

use std::sync::Arc;

use crate::{
    audit::{AuditLog, AuditMirror},
    blacklist::BlacklistStore,
    config::Config,
    domain::{ChatId, UserId},
    messaging::port::ChatClient,
    reconcile::{Reconciler, SweepOptions},
    registry::ChatRegistry,
    scheduler::SweepScheduler,
    storage::Storage,
};

/// Everything the command handlers and the scheduler share.
///
/// Cheap to clone; every service holds the same storage handle.
#[derive(Clone)]
pub struct Moderation {
    storage: Arc<dyn Storage>,
    audit: AuditLog,
    blacklist: BlacklistStore,
    registry: ChatRegistry,
    reconciler: Reconciler,
    scheduler: SweepScheduler,
}

impl Moderation {
    pub fn new(cfg: &Config, storage: Arc<dyn Storage>, client: Arc<dyn ChatClient>) -> Self {
        let mut audit = AuditLog::new(storage.clone());
        if let Some(path) = &cfg.audit_log_path {
            tracing::info!(
                path = %path.display(),
                json = cfg.audit_log_json,
                "audit mirror enabled"
            );
            audit = audit.with_mirror(AuditMirror::new(path.clone(), cfg.audit_log_json));
        }

        let blacklist = BlacklistStore::new(storage.clone(), audit.clone());
        let registry = ChatRegistry::new(storage.clone());
        let reconciler = Reconciler::new(
            blacklist.clone(),
            audit.clone(),
            client.clone(),
            SweepOptions {
                concurrency: cfg.sweep_concurrency,
                call_timeout: cfg.sweep_call_timeout,
            },
        );
        let scheduler = SweepScheduler::new(
            reconciler.clone(),
            registry.clone(),
            client,
            cfg.moderated_chat_ids.iter().copied().map(ChatId).collect(),
            cfg.admin_ids.iter().copied().map(UserId).collect(),
            cfg.sweep_schedule,
            cfg.sweep_call_timeout,
        );

        Self {
            storage,
            audit,
            blacklist,
            registry,
            reconciler,
            scheduler,
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn blacklist(&self) -> &BlacklistStore {
        &self.blacklist
    }

    pub fn registry(&self) -> &ChatRegistry {
        &self.registry
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn scheduler(&self) -> &SweepScheduler {
        &self.scheduler
    }

    /// Release the storage backend. Call after the scheduler has stopped.
    pub async fn close(&self) {
        self.storage.close().await;
        tracing::info!("storage closed");
    }
}
