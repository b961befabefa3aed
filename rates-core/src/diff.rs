use std::collections::HashMap;

use log::debug;

use crate::error::StoreError;
use crate::store::StateStore;
use crate::types::{ChangeCandidate, ChangeRecord, Quote};

/// Сравнивает снимок с хранилищем и фиксирует изменения.
///
/// - порядок результата = порядок снимка (независимо от порядка обхода хранилища)
/// - повтор id внутри снимка: побеждает последнее значение, позиция - первая
/// - id, пропавшие из снимка, не трогаются и не попадают в результат
pub fn compute(
    snapshot: &[Quote],
    store: &dyn StateStore,
) -> Result<Vec<ChangeRecord>, StoreError> {
    let mut position: HashMap<&str, usize> = HashMap::with_capacity(snapshot.len());
    let mut candidates: Vec<ChangeCandidate> = Vec::with_capacity(snapshot.len());

    for quote in snapshot {
        match position.get(quote.id.as_str()) {
            Some(&idx) => {
                debug!("duplicate id {} in snapshot; keeping the later value", quote.id);
                candidates[idx] = quote.to_candidate();
            }
            None => {
                position.insert(quote.id.as_str(), candidates.len());
                candidates.push(quote.to_candidate());
            }
        }
    }

    let mut changes = store.upsert_if_changed(&candidates)?;
    changes.sort_by_key(|rec| position.get(rec.id.as_str()).copied().unwrap_or(usize::MAX));

    debug!(
        "diff: {} quotes in snapshot, {} changed",
        candidates.len(),
        changes.len()
    );
    Ok(changes)
}
