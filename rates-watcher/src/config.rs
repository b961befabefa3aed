use std::time::Duration;

pub(crate) use rates_core::constants::{
    DEFAULT_FETCH_TIMEOUT, DEFAULT_NOTIFY_TIMEOUT, DEFAULT_POLL_INTERVAL,
};

pub(crate) const CONTROL_BIND_ADDR: &str = "127.0.0.1:7070";

/// Публичный API с котировками доллара (массив объектов `casa/compra/venta`).
pub(crate) const SOURCE_URL: &str = "https://dolarapi.com/v1/dolares";

pub(crate) const STATE_FILE: &str = "rates-state.json";

pub(crate) const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

pub(crate) const USER_AGENT: &str = concat!("rates-watcher/", env!("CARGO_PKG_VERSION"));

/// имя потока данных в логах планировщика
pub(crate) const STREAM_NAME: &str = "rates";

/// Сколько `CHECK WAIT` ждёт завершения цикла.
pub(crate) const MANUAL_CHECK_TIMEOUT: Duration = Duration::from_secs(60);
