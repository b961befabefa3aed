use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;

use crate::config;

/// Rates Watcher - опрашивает источник курсов валют и рассылает изменения.
///
/// Управляется по TCP командами CHECK / STATUS / GET / LIST (см. rates-ctl).
#[derive(Parser, Debug, Clone)]
#[command(name = "rates-watcher", version, about)]
pub(crate) struct Args {
    /// URL источника котировок (JSON-массив)
    #[arg(long, env = "RATES_SOURCE_URL", default_value = config::SOURCE_URL)]
    pub(crate) source_url: String,

    /// Интервал опроса, секунды
    #[arg(long = "interval", env = "RATES_POLL_INTERVAL", default_value_t = config::DEFAULT_POLL_INTERVAL.as_secs())]
    pub(crate) interval_secs: u64,

    /// Таймаут запроса к источнику, секунды
    #[arg(long = "fetch-timeout", env = "RATES_FETCH_TIMEOUT", default_value_t = config::DEFAULT_FETCH_TIMEOUT.as_secs())]
    pub(crate) fetch_timeout_secs: u64,

    /// Таймаут отправки уведомления, секунды
    #[arg(long = "notify-timeout", env = "RATES_NOTIFY_TIMEOUT", default_value_t = config::DEFAULT_NOTIFY_TIMEOUT.as_secs())]
    pub(crate) notify_timeout_secs: u64,

    /// Файл состояния (JSON)
    #[arg(long, env = "RATES_STATE_FILE", default_value = config::STATE_FILE)]
    pub(crate) state_file: PathBuf,

    /// Держать состояние только в памяти (после рестарта всё придёт как новое)
    #[arg(long)]
    pub(crate) in_memory: bool,

    /// Не запускать проверку сразу при старте, ждать первого интервала
    #[arg(long)]
    pub(crate) no_initial_check: bool,

    /// TCP адрес для команд управления, например 127.0.0.1:7070
    #[arg(long, env = "RATES_CONTROL_BIND", default_value = config::CONTROL_BIND_ADDR)]
    pub(crate) control_bind: SocketAddr,

    /// Токен Telegram-бота. Без него уведомления пишутся только в лог
    #[arg(long, env = "TELEGRAM_TOKEN", hide_env_values = true)]
    pub(crate) telegram_token: Option<String>,

    /// Чат, куда бот шлёт уведомления
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub(crate) telegram_chat_id: Option<String>,

    /// Базовый URL Bot API
    #[arg(long, env = "TELEGRAM_API_BASE", default_value = config::TELEGRAM_API_BASE)]
    pub(crate) telegram_api_base: String,
}

impl Args {
    /// Перекрёстные проверки, которые clap сам не делает.
    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.source_url.starts_with("http://") || self.source_url.starts_with("https://")) {
            bail!("--source-url must be an http(s) URL (got: {})", self.source_url);
        }
        if self.interval_secs == 0 {
            bail!("--interval must be greater than zero");
        }
        if self.fetch_timeout_secs == 0 || self.notify_timeout_secs == 0 {
            bail!("timeouts must be greater than zero");
        }

        match (&self.telegram_token, &self.telegram_chat_id) {
            (Some(_), None) => bail!("--telegram-token is set but --telegram-chat-id is missing"),
            (None, Some(_)) => bail!("--telegram-chat-id is set but --telegram-token is missing"),
            _ => {}
        }

        Ok(())
    }

    pub(crate) fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub(crate) fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub(crate) fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    /// (token, chat_id), если Telegram настроен
    pub(crate) fn telegram(&self) -> Option<(&str, &str)> {
        match (&self.telegram_token, &self.telegram_chat_id) {
            (Some(token), Some(chat)) => Some((token.as_str(), chat.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["rates-watcher"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let args = parse(&["--source-url", "https://example.test/v1/dolares"]);
        args.validate().unwrap();
        assert_eq!(args.interval(), config::DEFAULT_POLL_INTERVAL);
        assert_eq!(args.control_bind, config::CONTROL_BIND_ADDR.parse().unwrap());
    }

    #[test]
    fn telegram_needs_token_and_chat() {
        let args = parse(&[
            "--source-url",
            "https://example.test",
            "--telegram-token",
            "123:abc",
            "--telegram-chat-id",
            "42",
        ]);
        args.validate().unwrap();
        assert_eq!(args.telegram(), Some(("123:abc", "42")));

        let mut half = args.clone();
        half.telegram_chat_id = None;
        assert!(half.validate().is_err());
        assert_eq!(half.telegram(), None);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let args = parse(&["--source-url", "https://example.test", "--interval", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn non_http_source_is_rejected() {
        let args = parse(&["--source-url", "ftp://example.test"]);
        assert!(args.validate().is_err());
    }
}
