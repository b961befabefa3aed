use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use crate::diff;
use crate::error::CycleError;
use crate::notify::{DispatchResult, Dispatcher};
use crate::scheduler::{CycleRunner, PollCycle, SchedulerState};
use crate::source::QuoteSource;
use crate::store::StateStore;
use crate::types::ChangeRecord;

/// Отчёт об успешно завершённом цикле.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// сколько котировок пришло в снимке
    pub fetched: usize,
    pub changes: Vec<ChangeRecord>,
    pub dispatch: DispatchResult,
    /// сколько записей помечено `notified=true`
    pub marked: usize,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dispatch)
    }
}

/// Один проход fetch -> diff -> dispatch -> mark.
pub struct Pipeline {
    source: Box<dyn QuoteSource>,
    store: Arc<dyn StateStore>,
    dispatcher: Dispatcher,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn QuoteSource>,
        store: Arc<dyn StateStore>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            source,
            store,
            dispatcher,
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Выполняет цикл. Отмена проверяется только до старта: начатый цикл
    /// доводится до `mark_notified`.
    pub fn run_cycle(&self, cycle: &PollCycle) -> Result<CycleReport, CycleError> {
        if cycle.is_cancelled() {
            return Err(CycleError::Cancelled);
        }

        cycle.enter(SchedulerState::Fetching);
        let snapshot = self.source.fetch()?;
        debug!("[{}] fetched {} quotes", cycle.stream(), snapshot.len());

        cycle.enter(SchedulerState::Diffing);
        let changes = diff::compute(&snapshot, self.store.as_ref())?;

        cycle.enter(SchedulerState::Dispatching);
        let dispatch = self.dispatcher.send(&changes);

        let marked = if dispatch.is_delivered() {
            self.store.mark_notified(&changes)?
        } else {
            if !changes.is_empty() {
                warn!(
                    "[{}] {} change(s) not durably delivered; will retry next cycle",
                    cycle.stream(),
                    changes.len()
                );
            }
            0
        };

        Ok(CycleReport {
            fetched: snapshot.len(),
            changes,
            dispatch,
            marked,
        })
    }
}

impl CycleRunner for Pipeline {
    fn run(&mut self, cycle: &PollCycle) -> Result<CycleReport, CycleError> {
        self.run_cycle(cycle)
    }
}
