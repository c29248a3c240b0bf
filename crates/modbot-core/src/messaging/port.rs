use async_trait::async_trait;

use crate::{
    domain::{ChatId, UserId},
    errors::ActionResult,
    formatting::{split_text, TELEGRAM_SAFE_LIMIT},
};

/// The chat-platform capabilities the core calls into.
///
/// Every call may fail; callers treat failure as recoverable and log it.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Remove (ban) `user_id` from `chat_id`.
    async fn remove_member(&self, chat_id: ChatId, user_id: UserId) -> ActionResult;

    async fn list_administrators(&self, chat_id: ChatId) -> ActionResult<Vec<UserId>>;

    /// Send plain text.
    async fn send_message(&self, chat_id: ChatId, text: &str) -> ActionResult;
}

/// Send `text` in order as one or more messages under the Telegram size limit.
///
/// Stops at the first failed chunk.
pub async fn send_text(client: &dyn ChatClient, chat_id: ChatId, text: &str) -> ActionResult {
    for chunk in split_text(text, TELEGRAM_SAFE_LIMIT) {
        client.send_message(chat_id, &chunk).await?;
    }
    Ok(())
}
