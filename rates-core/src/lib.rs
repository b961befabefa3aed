//! # rates-core
//!
//! Ядро наблюдателя за курсами валют: получить снимок котировок, найти
//! изменения относительно сохранённого состояния, разослать их и отметить
//! доставленное.
//!
//! Этот крейт содержит:
//!
//! - [`source`] — контракт источника и разбор JSON-снимка
//! - [`store`] — хранилище состояния (в памяти и в JSON-файле)
//! - [`diff`] — поиск изменений снимка
//! - [`notify`] — рассылка изменений по каналам
//! - [`pipeline`] — один цикл fetch → diff → dispatch → mark
//! - [`scheduler`] — периодический запуск циклов и ручные проверки
//! - [`protocol`] — текстовый протокол управления
//!
//! ## Пример: один цикл вручную
//!
//! ```rust
//! use std::sync::Arc;
//! use rates_core::{
//!     Dispatcher, FetchError, LogChannel, MemoryStore, Pipeline, PollCycle, Quote,
//!     QuoteSource, parse_snapshot,
//! };
//!
//! struct Fixed;
//!
//! impl QuoteSource for Fixed {
//!     fn fetch(&self) -> Result<Vec<Quote>, FetchError> {
//!         parse_snapshot(
//!             r#"[{"moneda":"USD","casa":"blue","nombre":"Blue","compra":1180,"venta":1200,
//!                 "fechaActualizacion":"2024-10-18T15:00:00.000Z"}]"#,
//!         )
//!     }
//! }
//!
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.register(Box::new(LogChannel::default())).unwrap();
//! let pipeline = Pipeline::new(Box::new(Fixed), Arc::new(MemoryStore::new()), dispatcher);
//!
//! let first = pipeline.run_cycle(&PollCycle::detached("rates")).unwrap();
//! assert_eq!(first.changes.len(), 1);
//!
//! let second = pipeline.run_cycle(&PollCycle::detached("rates")).unwrap();
//! assert!(second.changes.is_empty());
//! ```
//!
//! ## Дизайн
//!
//! Всё синхронное, на потоках и `crossbeam-channel`. Сетевые адаптеры
//! (HTTP-источник, Telegram) живут в бинарнике `rates-watcher`, здесь только
//! контракты и чистая логика.

#![forbid(unsafe_code)]

/// Общие константы
pub mod constants;

/// Доменные типы (котировка, запись хранилища, изменение).
pub mod types;

/// Ошибки `rates-core`.
pub mod error;

pub mod source;

pub mod store;

pub mod diff;

pub mod notify;

pub mod pipeline;

pub mod scheduler;

/// Протокол управления (`CHECK`, `STATUS`, `GET`, `LIST`).
pub mod protocol;

// --- Re-exports (публичный фасад API) ---

pub use crate::error::{
    CycleError, DispatchError, FetchError, ProtocolError, StoreError,
};
pub use crate::notify::{
    Delivery, DeliveryChannel, DispatchResult, Dispatcher, LogChannel, RegistryError,
};
pub use crate::pipeline::{CycleReport, Pipeline};
pub use crate::protocol::{Command, Reply};
pub use crate::scheduler::{
    CycleRunner, ManualCheck, PollCycle, Scheduler, SchedulerConfig, SchedulerHandle,
    SchedulerState, SchedulerStats, TriggerOutcome,
};
pub use crate::source::{QuoteSource, parse_snapshot};
pub use crate::store::{JsonFileStore, MemoryStore, StateStore};
pub use crate::types::{ChangeCandidate, ChangeRecord, Quote, Rate, StoredQuote};
