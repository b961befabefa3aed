use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;

use log::{info, warn};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::error::DispatchError;
use crate::types::ChangeRecord;

/// Заголовок агрегированного сообщения
pub const MESSAGE_HEADER: &str = "Currency rates update:";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("channel already registered: {0}")]
    DuplicateChannel(String),
}

/// Гарантия доставки, которую требует канал.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Канал-"источник правды": только его успех даёт `mark_notified`
    Durable,
    /// Живой пинг, на отметку не влияет
    BestEffort,
}

/// Канал доставки уведомлений. Форматирование общее, транспорт свой.
///
/// Реализация обязана ограничивать время доставки; таймаут
/// возвращается как [`DispatchError`].
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &str;

    fn delivery(&self) -> Delivery {
        Delivery::BestEffort
    }

    fn deliver(&self, text: &str) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOutcome {
    pub delivery: Delivery,
    pub result: Result<(), DispatchError>,
}

/// Итог `Dispatcher::send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// Изменений нет, ввода-вывода не было
    NoOp,
    Sent {
        /// сколько изменений было в сообщении
        changes: usize,
        outcomes: BTreeMap<String, ChannelOutcome>,
    },
}

impl DispatchResult {
    /// Можно ли считать изменения доставленными (и звать `mark_notified`).
    ///
    /// Все durable-каналы должны отработать успешно; если durable-каналов
    /// нет, достаточно одного успешного канала.
    pub fn is_delivered(&self) -> bool {
        let DispatchResult::Sent { outcomes, .. } = self else {
            return false;
        };

        let mut durable = outcomes
            .values()
            .filter(|o| o.delivery == Delivery::Durable)
            .peekable();

        if durable.peek().is_some() {
            durable.all(|o| o.result.is_ok())
        } else {
            outcomes.values().any(|o| o.result.is_ok())
        }
    }
}

impl fmt::Display for DispatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchResult::NoOp => write!(f, "no changes"),
            DispatchResult::Sent { changes, outcomes } => {
                let plural = if *changes == 1 { "" } else { "s" };
                write!(f, "{changes} change{plural} dispatched:")?;
                for (name, outcome) in outcomes {
                    match &outcome.result {
                        Ok(()) => write!(f, " {name}=ok")?,
                        Err(e) => write!(f, " {name}=error({e})")?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// Рассылает одно агрегированное сообщение во все зарегистрированные каналы.
#[derive(Default)]
pub struct Dispatcher {
    channels: Vec<Box<dyn DeliveryChannel>>,
    names: HashSet<String>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: Box<dyn DeliveryChannel>) -> Result<(), RegistryError> {
        let name = channel.name().to_string();
        if !self.names.insert(name.clone()) {
            return Err(RegistryError::DuplicateChannel(name));
        }
        self.channels.push(channel);
        Ok(())
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.name())
    }

    /// Пустой набор изменений -> [`DispatchResult::NoOp`] без обращения к каналам.
    /// Ошибка одного канала не мешает остальным.
    pub fn send(&self, changes: &[ChangeRecord]) -> DispatchResult {
        if changes.is_empty() {
            return DispatchResult::NoOp;
        }

        let text = format_message(changes);
        let mut outcomes = BTreeMap::new();

        for channel in &self.channels {
            let result = channel.deliver(&text);
            match &result {
                Ok(()) => info!("notification delivered to {}", channel.name()),
                Err(e) => warn!("notification to {} failed: {e}", channel.name()),
            }
            outcomes.insert(
                channel.name().to_string(),
                ChannelOutcome {
                    delivery: channel.delivery(),
                    result,
                },
            );
        }

        DispatchResult::Sent {
            changes: changes.len(),
            outcomes,
        }
    }
}

/// Текст уведомления: заголовок и по строке на изменение, в порядке ввода.
///
/// `• Oficial (USD:oficial): buy 900 → 905, sell 940 → 945 @ 2024-10-18 15:00 UTC`
pub fn format_message(changes: &[ChangeRecord]) -> String {
    let mut out = String::from(MESSAGE_HEADER);
    for c in changes {
        out.push('\n');
        out.push_str(&format!(
            "• {} ({}): buy {}, sell {} @ {}",
            c.display_name,
            c.id,
            transition(c.old_buy, c.new_buy),
            transition(c.old_sell, c.new_sell),
            c.observed_at.format("%Y-%m-%d %H:%M UTC"),
        ));
    }
    out
}

fn transition(old: Option<Decimal>, new: Decimal) -> String {
    match old {
        Some(old) => format!("{old} → {new}"),
        None => format!("new → {new}"),
    }
}

/// Канал, пишущий уведомления в лог. Best-effort.
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new("log")
    }
}

impl DeliveryChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, text: &str) -> Result<(), DispatchError> {
        for line in text.lines() {
            info!(target: "rates::notify", "{line}");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};

    /// Канал, запоминающий доставленные тексты.
    #[derive(Clone)]
    pub(crate) struct RecordingChannel {
        pub(crate) name: String,
        pub(crate) delivery: Delivery,
        pub(crate) fail_with: Option<DispatchError>,
        pub(crate) sent: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingChannel {
        pub(crate) fn new(name: &str, delivery: Delivery) -> Self {
            Self {
                name: name.to_string(),
                delivery,
                fail_with: None,
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub(crate) fn failing(name: &str, delivery: Delivery, err: DispatchError) -> Self {
            Self {
                fail_with: Some(err),
                ..Self::new(name, delivery)
            }
        }

        pub(crate) fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl DeliveryChannel for RecordingChannel {
        fn name(&self) -> &str {
            &self.name
        }
        fn delivery(&self) -> Delivery {
            self.delivery
        }
        fn deliver(&self, text: &str) -> Result<(), DispatchError> {
            if let Some(e) = &self.fail_with {
                return Err(e.clone());
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    pub(crate) fn record(id: &str, old: Option<(Decimal, Decimal)>, new: (Decimal, Decimal)) -> ChangeRecord {
        ChangeRecord {
            id: id.to_string(),
            display_name: id.to_string(),
            old_buy: old.map(|o| o.0),
            old_sell: old.map(|o| o.1),
            new_buy: new.0,
            new_sell: new.1,
            observed_at: Utc.with_ymd_and_hms(2024, 10, 18, 15, 0, 0).unwrap(),
            version: 1,
        }
    }

    #[test]
    fn empty_changes_are_an_explicit_noop() {
        let ch = RecordingChannel::new("chat", Delivery::Durable);
        let mut d = Dispatcher::new();
        d.register(Box::new(ch.clone())).unwrap();

        let res = d.send(&[]);
        assert_eq!(res, DispatchResult::NoOp);
        assert!(!res.is_delivered());
        assert_eq!(ch.count(), 0);
    }

    #[test]
    fn one_message_per_send_for_every_channel() {
        let a = RecordingChannel::new("a", Delivery::Durable);
        let b = RecordingChannel::new("b", Delivery::BestEffort);
        let mut d = Dispatcher::new();
        d.register(Box::new(a.clone())).unwrap();
        d.register(Box::new(b.clone())).unwrap();

        let res = d.send(&[
            record("oficial", None, (dec!(900), dec!(940))),
            record("blue", Some((dec!(1), dec!(2))), (dec!(3), dec!(4))),
        ]);

        assert!(res.is_delivered());
        assert_eq!(a.count(), 1);
        assert_eq!(b.count(), 1);
        assert_eq!(a.sent.lock().unwrap()[0], b.sent.lock().unwrap()[0]);
    }

    #[test]
    fn failing_channel_is_isolated() {
        let broken = RecordingChannel::failing(
            "chat",
            Delivery::BestEffort,
            DispatchError::RateLimited { retry_after: None },
        );
        let ok = RecordingChannel::new("journal", Delivery::Durable);
        let mut d = Dispatcher::new();
        d.register(Box::new(broken)).unwrap();
        d.register(Box::new(ok.clone())).unwrap();

        let res = d.send(&[record("oficial", None, (dec!(1), dec!(2)))]);

        assert_eq!(ok.count(), 1);
        let DispatchResult::Sent { outcomes, .. } = &res else {
            panic!("expected Sent");
        };
        assert!(outcomes["journal"].result.is_ok());
        assert_eq!(
            outcomes["chat"].result,
            Err(DispatchError::RateLimited { retry_after: None })
        );
        // упал только best-effort канал
        assert!(res.is_delivered());
    }

    #[test]
    fn durable_failure_blocks_delivery() {
        let mut d = Dispatcher::new();
        d.register(Box::new(RecordingChannel::failing(
            "telegram",
            Delivery::Durable,
            DispatchError::ChannelUnavailable("timeout".into()),
        )))
        .unwrap();
        d.register(Box::new(RecordingChannel::new("log", Delivery::BestEffort)))
            .unwrap();

        let res = d.send(&[record("oficial", None, (dec!(1), dec!(2)))]);
        assert!(!res.is_delivered());
        assert!(res.to_string().contains("telegram=error(channel unavailable: timeout)"));
    }

    #[test]
    fn without_durable_channels_any_success_counts() {
        let mut d = Dispatcher::new();
        d.register(Box::new(RecordingChannel::failing(
            "chat",
            Delivery::BestEffort,
            DispatchError::ChannelUnavailable("down".into()),
        )))
        .unwrap();
        assert!(!d.send(&[record("a", None, (dec!(1), dec!(1)))]).is_delivered());

        d.register(Box::new(LogChannel::default())).unwrap();
        assert!(d.send(&[record("a", None, (dec!(1), dec!(1)))]).is_delivered());
    }

    #[test]
    fn duplicate_channel_name_is_rejected() {
        let mut d = Dispatcher::new();
        d.register(Box::new(LogChannel::default())).unwrap();
        let err = d.register(Box::new(LogChannel::new("log"))).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateChannel(n) if n == "log"));
        assert_eq!(d.channel_names().collect::<Vec<_>>(), vec!["log"]);
    }

    #[test]
    fn message_lists_changes_in_input_order() {
        let text = format_message(&[
            record("USD:oficial", Some((dec!(900), dec!(940))), (dec!(905), dec!(945))),
            record("USD:blue", None, (dec!(1180.5), dec!(1200))),
        ]);

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], MESSAGE_HEADER);
        assert_eq!(
            lines[1],
            "• USD:oficial (USD:oficial): buy 900 → 905, sell 940 → 945 @ 2024-10-18 15:00 UTC"
        );
        assert_eq!(
            lines[2],
            "• USD:blue (USD:blue): buy new → 1180.5, sell new → 1200 @ 2024-10-18 15:00 UTC"
        );
    }

    #[test]
    fn display_summarises_outcomes() {
        assert_eq!(DispatchResult::NoOp.to_string(), "no changes");

        let mut d = Dispatcher::new();
        d.register(Box::new(LogChannel::default())).unwrap();
        let res = d.send(&[record("a", None, (dec!(1), dec!(1)))]);
        assert_eq!(res.to_string(), "1 change dispatched: log=ok");
    }
}
