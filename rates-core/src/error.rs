use std::time::Duration;
use thiserror::Error;

/// Ошибки получения снимка котировок
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Сеть недоступна или истёк таймаут
    #[error("quote source unreachable: {0}")]
    Unreachable(String),

    /// Источник ответил HTTP-ошибкой
    #[error("quote source returned HTTP {status}")]
    UpstreamError { status: u16 },

    /// Ответ не соответствует ожидаемой форме
    #[error("malformed quote source response: {0}")]
    MalformedResponse(String),
}

/// Ошибки хранилища состояния
#[derive(Debug, Error)]
pub enum StoreError {
    /// Хранилище не читается / не пишется
    #[error("state store unavailable: {0}")]
    Unavailable(String),

    /// Другой писатель постоянно менял состояние под нами
    #[error("state store conflict: gave up after {attempts} attempts")]
    ConflictRetryExhausted { attempts: u32 },
}

/// Ошибки доставки в один канал
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("rate limited{}", fmt_retry_after(.retry_after))]
    RateLimited { retry_after: Option<Duration> },
}

fn fmt_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

/// Почему цикл опроса завершился без отчёта
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Остановка пришла до первой записи в хранилище
    #[error("cycle cancelled")]
    Cancelled,
}

/// Ошибки текстового протокола управления
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// пустая команда
    #[error("empty command")]
    EmptyCommand,

    /// Неизвестная команда
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Не передан аргумент команды
    #[error("missing argument for {0}")]
    MissingArgument(&'static str),

    /// Неизвестный флаг команды
    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),

    /// Ответ не начинается с OK/ERR
    #[error("malformed reply: {0:?}")]
    MalformedReply(String),
}
