//! Telegram adapter (teloxide).
//!
//! Implements the `modbot-core` ChatClient port over the Bot API and hosts the
//! admin command handlers.

use async_trait::async_trait;
use teloxide::{prelude::*, RequestError};
use tokio::time::sleep;

pub mod handlers;
pub mod router;

use modbot_core::{
    domain::{ChatId, UserId},
    errors::{ActionError, ActionResult},
    messaging::port::ChatClient,
};

#[derive(Clone)]
pub struct TelegramChatClient {
    bot: Bot,
}

impl TelegramChatClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_user(user_id: UserId) -> ActionResult<teloxide::types::UserId> {
        u64::try_from(user_id.0)
            .map(teloxide::types::UserId)
            .map_err(|_| ActionError::Failed(format!("invalid user id {user_id}")))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> ActionResult<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    tracing::debug!("telegram: rate limited, retrying in {d:?}");
                    sleep(d).await;
                }
                Err(other) => return Err(classify(&other)),
            }
        }
    }
}

/// Sort a Bot API failure into the categories the core reports on.
pub fn classify(e: &RequestError) -> ActionError {
    let text = e.to_string();
    let lower = text.to_lowercase();
    if lower.contains("not enough rights")
        || lower.contains("chat_admin_required")
        || lower.contains("user is an administrator")
        || lower.contains("can't remove chat owner")
    {
        ActionError::PermissionDenied(text)
    } else if lower.contains("user not found")
        || lower.contains("participant_id_invalid")
        || lower.contains("user_not_participant")
    {
        ActionError::NotMember(text)
    } else {
        ActionError::Failed(format!("telegram error: {text}"))
    }
}

#[async_trait]
impl ChatClient for TelegramChatClient {
    async fn remove_member(&self, chat_id: ChatId, user_id: UserId) -> ActionResult {
        let user = Self::tg_user(user_id)?;
        self.with_retry(|| self.bot.ban_chat_member(Self::tg_chat(chat_id), user))
            .await?;
        Ok(())
    }

    async fn list_administrators(&self, chat_id: ChatId) -> ActionResult<Vec<UserId>> {
        let members = self
            .with_retry(|| self.bot.get_chat_administrators(Self::tg_chat(chat_id)))
            .await?;
        Ok(members
            .into_iter()
            .map(|m| UserId(m.user.id.0 as i64))
            .collect())
    }

    async fn send_message(&self, chat_id: ChatId, text: &str) -> ActionResult {
        self.with_retry(|| self.bot.send_message(Self::tg_chat(chat_id), text.to_string()))
            .await?;
        Ok(())
    }
}
