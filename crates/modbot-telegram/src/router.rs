use std::sync::Arc;

use teloxide::{
    dispatching::Dispatcher,
    dptree,
    prelude::*,
    types::BotCommand,
};

use modbot_core::{config::Config, messaging::port::ChatClient, service::Moderation};

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub moderation: Moderation,
    /// Outbound client (throttled); replies go through it too.
    pub client: Arc<dyn ChatClient>,
}

/// Commands shown in the Telegram menu.
pub fn command_menu() -> Vec<BotCommand> {
    vec![
        BotCommand::new("help", "Show available commands"),
        BotCommand::new("adduser", "Blacklist a user: /adduser <id> [label] or reply"),
        BotCommand::new("deluser", "Remove a user from the blacklist"),
        BotCommand::new("blacklist", "List blacklisted users"),
        BotCommand::new("stats", "Blacklist statistics"),
        BotCommand::new("force_check", "Check this chat now"),
        BotCommand::new("addchat", "Add a chat to scheduled checks"),
        BotCommand::new("delchat", "Remove a chat from scheduled checks"),
        BotCommand::new("chats", "List moderated chats"),
        BotCommand::new("log", "Recent audit entries: /log [n]"),
    ]
}

/// Long-poll updates until Ctrl-C.
pub async fn run_polling(bot: Bot, state: AppState) -> anyhow::Result<()> {
    match bot.get_me().await {
        Ok(me) => tracing::info!("modbot started: @{}", me.username()),
        Err(e) => tracing::warn!("get_me failed: {e}"),
    }
    tracing::info!(
        admins = state.cfg.admin_ids.len(),
        static_chats = state.cfg.moderated_chat_ids.len(),
        "polling for updates"
    );

    if let Err(e) = bot.set_my_commands(command_menu()).await {
        tracing::warn!("failed to register bot commands: {e}");
    }

    let state = Arc::new(state);
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
