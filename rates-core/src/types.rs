use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Котировка из одного снимка источника.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Естественный ключ, например `USD:oficial`
    pub id: String,
    pub display_name: String,
    pub buy: Decimal,
    pub sell: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl Quote {
    pub fn to_candidate(&self) -> ChangeCandidate {
        ChangeCandidate {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            buy: self.buy,
            sell: self.sell,
            observed_at: self.observed_at,
        }
    }
}

/// Пара (покупка, продажа).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    pub buy: Decimal,
    pub sell: Decimal,
}

/// Последнее известное значение котировки в хранилище.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredQuote {
    pub id: String,
    pub display_name: String,
    pub buy: Decimal,
    pub sell: Decimal,
    pub last_updated_at: DateTime<Utc>,
    /// true только после успешной доставки уведомления
    pub notified: bool,
    /// растёт при каждой записи, нужен для оптимистичной проверки в `mark_notified`
    pub version: u64,
    /// значение, о котором пользователей уведомили последним (пока запись не доставлена)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Rate>,
}

impl StoredQuote {
    pub fn rate(&self) -> Rate {
        Rate {
            buy: self.buy,
            sell: self.sell,
        }
    }
}

/// Кандидат на запись, строится из каждой котировки снимка.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeCandidate {
    pub id: String,
    pub display_name: String,
    pub buy: Decimal,
    pub sell: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// Результат сравнения снимка с хранилищем для одного id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub id: String,
    pub display_name: String,
    pub old_buy: Option<Decimal>,
    pub old_sell: Option<Decimal>,
    pub new_buy: Decimal,
    pub new_sell: Decimal,
    pub observed_at: DateTime<Utc>,
    /// версия записи в хранилище, выданная `upsert_if_changed`
    pub version: u64,
}

impl ChangeRecord {
    /// Первое появление id (старого значения нет).
    pub fn is_new(&self) -> bool {
        self.old_buy.is_none() && self.old_sell.is_none()
    }
}
