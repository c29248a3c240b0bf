use std::sync::Arc;

use chrono::Utc;

use crate::{
    domain::{ChatId, ModeratedChat},
    keyed::KeyedCollection,
    storage::Storage,
    Result,
};

/// Chats registered at runtime for periodic sweeps.
///
/// Statically configured chats are not stored here; the scheduler merges both.
#[derive(Clone)]
pub struct ChatRegistry {
    chats: KeyedCollection<ModeratedChat>,
}

impl ChatRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            chats: KeyedCollection::new(storage),
        }
    }

    /// `true` if the chat was newly registered.
    pub async fn register(&self, chat_id: ChatId, label: Option<String>) -> Result<bool> {
        let chat = ModeratedChat {
            chat_id,
            label,
            created_at: Utc::now(),
        };
        let applied = self.chats.insert(chat, None).await?.applied();
        if applied {
            tracing::info!(chat_id = chat_id.0, "registry: chat registered");
        }
        Ok(applied)
    }

    /// `true` if the chat was registered and is now removed.
    pub async fn deregister(&self, chat_id: ChatId) -> Result<bool> {
        let applied = self.chats.remove(chat_id.0, None).await?.applied();
        if applied {
            tracing::info!(chat_id = chat_id.0, "registry: chat deregistered");
        }
        Ok(applied)
    }

    pub async fn contains(&self, chat_id: ChatId) -> Result<bool> {
        self.chats.contains(chat_id.0).await
    }

    pub async fn list_all(&self) -> Result<Vec<ChatId>> {
        Ok(self.chats.keys().await?.into_iter().map(ChatId).collect())
    }

    pub async fn entries(&self) -> Result<Vec<ModeratedChat>> {
        self.chats.all().await
    }
}
