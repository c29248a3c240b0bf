use std::sync::Arc;

use teloxide::Bot;
use tokio_util::sync::CancellationToken;

use modbot_core::{
    config::Config,
    messaging::{
        port::ChatClient,
        throttled::{ThrottleConfig, ThrottledChatClient},
    },
    service::Moderation,
    storage::{MemoryStorage, Storage},
};
use modbot_sqlite::SqliteStorage;
use modbot_telegram::{router::AppState, TelegramChatClient};

async fn open_storage(cfg: &Config) -> modbot_core::Result<Arc<dyn Storage>> {
    if cfg.uses_memory_storage() {
        tracing::warn!("DATABASE_URL=memory: the blacklist will not survive a restart");
        return Ok(Arc::new(MemoryStorage::new()));
    }
    Ok(Arc::new(SqliteStorage::connect(&cfg.database_url).await?))
}

#[tokio::main]
async fn main() -> Result<(), modbot_core::Error> {
    modbot_core::logging::init("modbot")?;

    let cfg = Arc::new(Config::load()?);
    let storage = open_storage(&cfg).await?;

    // Throttle on top of the raw adapter; the adapter still retries once on 429.
    let bot = Bot::new(cfg.bot_token.clone());
    let raw: Arc<dyn ChatClient> = Arc::new(TelegramChatClient::new(bot.clone()));
    let client: Arc<dyn ChatClient> =
        Arc::new(ThrottledChatClient::new(raw, ThrottleConfig::default()));

    let moderation = Moderation::new(&cfg, storage, client.clone());

    let cancel = CancellationToken::new();
    let scheduler = moderation.scheduler().spawn(cancel.clone());

    let state = AppState {
        cfg: cfg.clone(),
        moderation: moderation.clone(),
        client,
    };
    let polled = modbot_telegram::router::run_polling(bot, state).await;

    tracing::info!("shutting down");
    cancel.cancel();
    if let Err(e) = scheduler.await {
        tracing::error!("scheduler task failed: {e}");
    }
    moderation.close().await;

    polled.map_err(|e| modbot_core::Error::External(format!("telegram bot failed: {e}")))
}
