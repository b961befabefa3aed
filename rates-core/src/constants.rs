use std::time::Duration;

/// Интервал опроса источника по умолчанию
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Таймаут запроса к источнику котировок
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Таймаут доставки уведомления в один канал
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Как часто воркер планировщика проверяет флаг остановки
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Сколько раз файловое хранилище перечитывает состояние при конфликте
pub const MAX_CONFLICT_RETRIES: u32 = 5;
