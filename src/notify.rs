use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;

/// Delivery is best effort. A failed send is logged and dropped so that
/// trading code never blocks or errors on notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, message: &str);
}

pub type SharedNotifier = Arc<dyn NotificationSink>;

/// Pushes messages to a Telegram chat through the bot API.
pub struct TelegramNotifier {
    client: Client,
    token: String,
    chat_id: String,
    timeout: Duration,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String, timeout_secs: u64) -> Self {
        Self {
            client: Client::new(),
            token,
            chat_id,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn notify(&self, message: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let body = serde_json::json!({ "chat_id": self.chat_id, "text": message });
        let result = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!("Telegram send failed: {}", resp.status()),
            Err(e) => warn!("Telegram send failed: {}", e),
        }
    }
}

/// Fallback sink when no Telegram credentials are configured.
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, message: &str) {
        info!("[notify] {}", message);
    }
}

pub fn build_notifier(cfg: &Config) -> SharedNotifier {
    match (&cfg.telegram_token, &cfg.telegram_chat_id) {
        (Some(token), Some(chat_id)) => Arc::new(TelegramNotifier::new(
            token.clone(),
            chat_id.clone(),
            cfg.http_timeout_secs,
        )),
        _ => Arc::new(LogNotifier),
    }
}
