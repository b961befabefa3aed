use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{StateStore, apply_candidate, apply_mark};
use crate::error::StoreError;
use crate::types::{ChangeCandidate, ChangeRecord, StoredQuote};

/// Хранилище в памяти процесса. Не переживает рестарт: для тестов и
/// запусков без `--state-file`.
#[derive(Default)]
pub struct MemoryStore {
    quotes: Mutex<BTreeMap<String, StoredQuote>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, StoredQuote>> {
        match self.quotes.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(), // продолжаем, несмотря на poison
        }
    }
}

impl StateStore for MemoryStore {
    fn get(&self, id: &str) -> Result<Option<StoredQuote>, StoreError> {
        Ok(self.lock().get(id).cloned())
    }

    fn upsert_if_changed(
        &self,
        candidates: &[ChangeCandidate],
    ) -> Result<Vec<ChangeRecord>, StoreError> {
        // блокировка берётся на каждый id: разные id могут чередоваться с другими писателями
        Ok(candidates
            .iter()
            .filter_map(|c| apply_candidate(&mut self.lock(), c))
            .collect())
    }

    fn mark_notified(&self, delivered: &[ChangeRecord]) -> Result<usize, StoreError> {
        Ok(delivered
            .iter()
            .filter(|rec| apply_mark(&mut self.lock(), rec))
            .count())
    }

    fn list(&self) -> Result<Vec<StoredQuote>, StoreError> {
        Ok(self.lock().values().cloned().collect())
    }
}
