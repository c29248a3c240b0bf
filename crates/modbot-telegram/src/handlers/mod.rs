//! Telegram update handlers.
//!
//! Only admins may run commands. Plain messages from everyone else are ignored.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use modbot_core::{
    domain::{ChatId, UserId},
    messaging::port::send_text,
};

use crate::router::AppState;

pub mod commands;

use commands::{Invocation, ReplyTarget};

pub fn is_admin(user_id: Option<UserId>, admins: &[i64]) -> bool {
    match user_id {
        Some(id) => admins.contains(&id.0),
        None => false,
    }
}

pub async fn handle_message(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let sender = msg.from().map(|u| UserId(u.id.0 as i64));
    let reply_to = msg
        .reply_to_message()
        .and_then(|m| m.from())
        .map(|u| ReplyTarget {
            user_id: UserId(u.id.0 as i64),
            username: u.username.clone(),
        });

    let inv = Invocation {
        chat_id: ChatId(msg.chat.id.0),
        is_private: msg.chat.is_private(),
        sender,
        text,
        reply_to,
    };

    if let Some(reply) = commands::execute(&state, inv).await {
        send_reply(&state, ChatId(msg.chat.id.0), &reply).await;
    }
    Ok(())
}

/// Send a reply, split into several messages when it is too long for one.
pub(crate) async fn send_reply(state: &AppState, chat_id: ChatId, text: &str) {
    if let Err(e) = send_text(state.client.as_ref(), chat_id, text).await {
        tracing::warn!(chat_id = chat_id.0, "failed to send reply: {e}");
    }
}
