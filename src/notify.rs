use crate::{error::Result, store::UserId};
use async_trait::async_trait;
use log::info;
use serde::Serialize;

/// Delivers user-facing messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user: UserId, message: &str) -> Result<()>;
}

/// Writes notifications to the log. Used when no bot token is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user: UserId, message: &str) -> Result<()> {
        info!("📣 [user {}] {}", user, message);
        Ok(())
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: UserId,
    text: &'a str,
}

/// Sends notifications through the Telegram Bot API.
pub struct TelegramNotifier {
    http: reqwest::Client,
    endpoint: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("https://api.telegram.org/bot{}/sendMessage", bot_token),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, user: UserId, message: &str) -> Result<()> {
        self.http
            .post(&self.endpoint)
            .json(&SendMessage {
                chat_id: user,
                text: message,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
