//! Хранилище последних известных значений котировок.
//!
//! Единственный источник правды о том, "что мы видели в последний раз".
//! Сравнение и запись по одному id выполняются атомарно, поэтому два
//! пересекающихся цикла не могут оба решить, что значение изменилось.

use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::types::{ChangeCandidate, ChangeRecord, Rate, StoredQuote};

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

pub trait StateStore: Send + Sync {
    /// Точечный поиск по id.
    fn get(&self, id: &str) -> Result<Option<StoredQuote>, StoreError>;

    /// Для каждого кандидата атомарно сравнивает (buy, sell) и флаг `notified`
    /// с сохранённым значением. Если записи нет, значение другое или
    /// уведомление ещё не доставлено, пишет новое значение с `notified=false`
    /// и возвращает [`ChangeRecord`]. Порядок результата = порядок кандидатов.
    fn upsert_if_changed(
        &self,
        candidates: &[ChangeCandidate],
    ) -> Result<Vec<ChangeRecord>, StoreError>;

    /// Ставит `notified=true` только тем записям, чья версия не изменилась
    /// с момента `upsert_if_changed`. Возвращает число помеченных.
    fn mark_notified(&self, delivered: &[ChangeRecord]) -> Result<usize, StoreError>;

    /// Все записи, отсортированные по id.
    fn list(&self) -> Result<Vec<StoredQuote>, StoreError>;
}

/// Ищет котировку: точный id, затем без учёта регистра по id
/// или по части после `:` (`oficial` -> `USD:oficial`).
pub fn find(store: &dyn StateStore, query: &str) -> Result<Option<StoredQuote>, StoreError> {
    let query = query.trim();
    if let Some(q) = store.get(query)? {
        return Ok(Some(q));
    }

    let found = store.list()?.into_iter().find(|q| {
        q.id.eq_ignore_ascii_case(query)
            || q.id
                .rsplit_once(':')
                .is_some_and(|(_, casa)| casa.eq_ignore_ascii_case(query))
    });
    Ok(found)
}

/// Один шаг compare-and-set над картой. Общий для всех реализаций:
/// вызывающая сторона держит блокировку.
pub(crate) fn apply_candidate(
    quotes: &mut BTreeMap<String, StoredQuote>,
    c: &ChangeCandidate,
) -> Option<ChangeRecord> {
    let incoming = Rate {
        buy: c.buy,
        sell: c.sell,
    };

    let (old, version) = match quotes.get(&c.id) {
        Some(stored) if stored.notified && stored.rate() == incoming => return None,
        // pending-запись хранит значение, о котором уведомили последним
        Some(stored) if !stored.notified => (stored.previous, stored.version + 1),
        Some(stored) => (Some(stored.rate()), stored.version + 1),
        None => (None, 1),
    };

    quotes.insert(
        c.id.clone(),
        StoredQuote {
            id: c.id.clone(),
            display_name: c.display_name.clone(),
            buy: c.buy,
            sell: c.sell,
            last_updated_at: c.observed_at,
            notified: false,
            version,
            previous: old,
        },
    );

    Some(ChangeRecord {
        id: c.id.clone(),
        display_name: c.display_name.clone(),
        old_buy: old.map(|r| r.buy),
        old_sell: old.map(|r| r.sell),
        new_buy: c.buy,
        new_sell: c.sell,
        observed_at: c.observed_at,
        version,
    })
}

/// Возвращает true, если запись помечена.
pub(crate) fn apply_mark(
    quotes: &mut BTreeMap<String, StoredQuote>,
    delivered: &ChangeRecord,
) -> bool {
    match quotes.get_mut(&delivered.id) {
        Some(stored) if stored.version == delivered.version && !stored.notified => {
            stored.notified = true;
            stored.previous = None;
            true
        }
        _ => false,
    }
}
