use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, UserId},
    errors::ActionResult,
    messaging::port::ChatClient,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* Telegram API calls (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between calls per chat (Telegram 1 msg/sec style limits).
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40), // ~25/sec
            per_chat_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// ChatClient decorator that rate-limits outbound calls.
///
/// Messages are spaced per chat; bans and admin lookups only take the global
/// slot so a sweep over one chat is not slowed to one call per second.
pub struct ThrottledChatClient {
    inner: Arc<dyn ChatClient>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<HashMap<i64, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledChatClient {
    pub fn new(inner: Arc<dyn ChatClient>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for_chat(&self, chat_id: i64) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_chat.lock().await;
        map.entry(chat_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_chat_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle_chat(&self, chat_id: i64) {
        let global_wait = { self.global.lock().await.reserve() };
        let chat_wait = {
            let lim = self.limiter_for_chat(chat_id).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(chat_wait);
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }

    async fn throttle_global(&self) {
        let wait = { self.global.lock().await.reserve() };
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl ChatClient for ThrottledChatClient {
    async fn remove_member(&self, chat_id: ChatId, user_id: UserId) -> ActionResult {
        self.throttle_global().await;
        self.inner.remove_member(chat_id, user_id).await
    }

    async fn list_administrators(&self, chat_id: ChatId) -> ActionResult<Vec<UserId>> {
        self.throttle_global().await;
        self.inner.list_administrators(chat_id).await
    }

    async fn send_message(&self, chat_id: ChatId, text: &str) -> ActionResult {
        self.throttle_chat(chat_id.0).await;
        self.inner.send_message(chat_id, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        sent: StdMutex<Vec<(ChatId, String)>>,
    }

    #[async_trait::async_trait]
    impl ChatClient for Recorder {
        async fn remove_member(&self, _chat_id: ChatId, _user_id: UserId) -> ActionResult {
            Ok(())
        }

        async fn list_administrators(&self, _chat_id: ChatId) -> ActionResult<Vec<UserId>> {
            Ok(vec![UserId(1)])
        }

        async fn send_message(&self, chat_id: ChatId, text: &str) -> ActionResult {
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(())
        }
    }

    #[test]
    fn limiter_reserves_consecutive_slots() {
        let mut lim = IntervalLimiter::new(Duration::from_secs(10));
        assert_eq!(lim.reserve(), Duration::ZERO);
        let second = lim.reserve();
        assert!(second > Duration::from_secs(9), "{second:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn messages_to_one_chat_are_spaced() {
        let inner = Arc::new(Recorder::default());
        let client = ThrottledChatClient::new(
            inner.clone(),
            ThrottleConfig {
                global_min_interval: Duration::ZERO,
                per_chat_min_interval: Duration::from_secs(1),
            },
        );

        let start = Instant::now();
        client.send_message(ChatId(1), "a").await.unwrap();
        client.send_message(ChatId(1), "b").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(inner.sent.lock().unwrap().len(), 2);
        assert_eq!(
            client.list_administrators(ChatId(1)).await.unwrap(),
            vec![UserId(1)]
        );
    }
}
