use std::time::Duration;

use log::debug;
use rates_core::{Delivery, DeliveryChannel, DispatchError};
use reqwest::StatusCode;
use reqwest::blocking::{Client, ClientBuilder};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use serde_json::{Value, json};
use thiserror::Error;

use crate::config;
use crate::http_source::describe;

/// Ошибки настройки канала (до первой отправки)
#[derive(Debug, Error)]
pub(crate) enum TelegramConfigError {
    #[error("telegram token is empty")]
    EmptyToken,

    #[error("telegram chat id is empty")]
    EmptyChatId,

    #[error("build telegram http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Канал доставки через Telegram Bot API (`sendMessage`).
///
/// Durable: пока сообщение не принято Telegram, изменения не считаются
/// доставленными и уйдут повторно в следующем цикле.
pub(crate) struct TelegramChannel {
    /// содержит токен, в логи не попадает
    endpoint: String,
    chat_id: String,
    client: Client,
}

impl TelegramChannel {
    pub(crate) fn new(
        api_base: &str,
        token: &str,
        chat_id: &str,
        timeout: Duration,
    ) -> Result<Self, TelegramConfigError> {
        Self::with_builder(api_base, token, chat_id, Client::builder().timeout(timeout))
    }

    fn with_builder(
        api_base: &str,
        token: &str,
        chat_id: &str,
        builder: ClientBuilder,
    ) -> Result<Self, TelegramConfigError> {
        let token = token.trim();
        let chat_id = chat_id.trim();
        if token.is_empty() {
            return Err(TelegramConfigError::EmptyToken);
        }
        if chat_id.is_empty() {
            return Err(TelegramConfigError::EmptyChatId);
        }

        let client = builder.user_agent(config::USER_AGENT).build()?;

        Ok(Self {
            endpoint: format!("{}/bot{token}/sendMessage", api_base.trim_end_matches('/')),
            chat_id: chat_id.to_string(),
            client,
        })
    }
}

impl DeliveryChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn delivery(&self) -> Delivery {
        Delivery::Durable
    }

    fn deliver(&self, text: &str) -> Result<(), DispatchError> {
        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_string())
            .send()
            // URL содержит токен бота
            .map_err(|e| DispatchError::ChannelUnavailable(describe(&e.without_url())))?;

        let status = resp.status();
        let header_retry = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body: Value = resp
            .text()
            .ok()
            .and_then(|t| serde_json::from_str(&t).ok())
            .unwrap_or(Value::Null);

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = body
                .pointer("/parameters/retry_after")
                .and_then(Value::as_u64)
                .or(header_retry)
                .map(Duration::from_secs);
            return Err(DispatchError::RateLimited { retry_after });
        }

        let accepted = body.get("ok").and_then(Value::as_bool).unwrap_or(false);
        if !status.is_success() || !accepted {
            let description = body
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("no description");
            return Err(DispatchError::ChannelUnavailable(format!(
                "HTTP {}: {description}",
                status.as_u16()
            )));
        }

        debug!("telegram accepted message for chat {}", self.chat_id);
        Ok(())
    }
}
