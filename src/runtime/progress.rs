use crate::delete::executor::DeleteOutcome;
use std::sync::{Mutex, PoisonError};

/// Running delete totals for one collection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressTotals {
    pub deleted: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct ProgressState {
    totals: ProgressTotals,
    last_logged: u64,
}

/// Folds batch outcomes into run totals and logs a progress line roughly
/// every `log_every` deleted keys.
#[derive(Debug)]
pub struct ProgressAggregator {
    table: String,
    log_every: u64,
    state: Mutex<ProgressState>,
}

impl ProgressAggregator {
    pub fn new(table: impl Into<String>, log_every: u64) -> Self {
        Self {
            table: table.into(),
            log_every: log_every.max(1),
            state: Mutex::new(ProgressState::default()),
        }
    }

    pub fn record(&self, outcome: &DeleteOutcome) -> ProgressTotals {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.totals.deleted += outcome.deleted as u64;
        state.totals.failed += outcome.failed_keys.len() as u64;

        if state.totals.deleted - state.last_logged >= self.log_every {
            state.last_logged = state.totals.deleted;
            tracing::info!(
                table = %self.table,
                deleted = state.totals.deleted,
                failed = state.totals.failed,
                "deleted orphaned records"
            );
        }

        state.totals
    }

    pub fn totals(&self) -> ProgressTotals {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .totals
    }
}
