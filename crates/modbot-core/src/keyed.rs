//! One insert-if-absent / remove-if-present contract for every keyed entity.

use std::{marker::PhantomData, sync::Arc};

use crate::{
    domain::{BlacklistEntry, ChatId, ModeratedChat, NewAuditEntry, UserId},
    storage::{Collection, Record, Storage, WriteOutcome},
    Result,
};

/// An entity stored in a keyed collection with a unique `i64` key.
pub trait Keyed: Sized + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn key(&self) -> i64;
    fn into_record(self) -> Record;
    fn from_record(record: Record) -> Self;
}

impl Keyed for BlacklistEntry {
    const COLLECTION: Collection = Collection::Blacklist;

    fn key(&self) -> i64 {
        self.user_id.0
    }

    fn into_record(self) -> Record {
        Record {
            key: self.user_id.0,
            label: self.label,
            created_at: self.created_at,
        }
    }

    fn from_record(record: Record) -> Self {
        Self {
            user_id: UserId(record.key),
            label: record.label,
            created_at: record.created_at,
        }
    }
}

impl Keyed for ModeratedChat {
    const COLLECTION: Collection = Collection::ModeratedChats;

    fn key(&self) -> i64 {
        self.chat_id.0
    }

    fn into_record(self) -> Record {
        Record {
            key: self.chat_id.0,
            label: self.label,
            created_at: self.created_at,
        }
    }

    fn from_record(record: Record) -> Self {
        Self {
            chat_id: ChatId(record.key),
            label: record.label,
            created_at: record.created_at,
        }
    }
}

/// Typed view over one collection of a [`Storage`] backend.
pub struct KeyedCollection<E> {
    storage: Arc<dyn Storage>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for KeyedCollection<E> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Keyed> KeyedCollection<E> {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            _entity: PhantomData,
        }
    }

    /// Insert unless the key exists. `audit` is stored only if the insert happens.
    pub async fn insert(&self, entity: E, audit: Option<NewAuditEntry>) -> Result<WriteOutcome> {
        self.storage
            .insert(E::COLLECTION, entity.into_record(), audit)
            .await
    }

    /// Remove if present. `audit` is stored only if the removal happens.
    pub async fn remove(&self, key: i64, audit: Option<NewAuditEntry>) -> Result<WriteOutcome> {
        self.storage.delete(E::COLLECTION, key, audit).await
    }

    pub async fn contains(&self, key: i64) -> Result<bool> {
        self.storage.contains(E::COLLECTION, key).await
    }

    pub async fn keys(&self) -> Result<Vec<i64>> {
        self.storage.keys(E::COLLECTION).await
    }

    pub async fn all(&self) -> Result<Vec<E>> {
        Ok(self
            .storage
            .records(E::COLLECTION)
            .await?
            .into_iter()
            .map(E::from_record)
            .collect())
    }

    pub async fn len(&self) -> Result<u64> {
        self.storage.count(E::COLLECTION).await
    }
}
