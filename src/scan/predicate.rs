use crate::runtime::config::StalenessFilter;
use crate::scan::children::ChildRecord;
use crate::scan::parents::ParentKeySet;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Decision for a single child record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Orphan,
    ParentExists,
    /// Orphaned, but not older than the cutoff (or undated); retained.
    Fresh,
}

/// Formatted `now - offset`, fixed once per run. Record timestamps are compared
/// against it as strings, so the format must sort chronologically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessCutoff {
    threshold: String,
}

impl StalenessCutoff {
    pub fn new(threshold: impl Into<String>) -> Self {
        Self {
            threshold: threshold.into(),
        }
    }

    pub fn from_filter(
        filter: &StalenessFilter,
        now: DateTime<Utc>,
        offset: Duration,
    ) -> Result<Self> {
        let offset = chrono::Duration::from_std(offset).context("staleness_offset out of range")?;
        let cutoff = now
            .checked_sub_signed(offset)
            .ok_or_else(|| anyhow!("staleness cutoff underflows the calendar"))?;
        Ok(Self::new(
            cutoff.format(filter.timestamp_format()).to_string(),
        ))
    }

    pub fn threshold(&self) -> &str {
        &self.threshold
    }

    pub fn is_stale(&self, timestamp: Option<&str>) -> bool {
        timestamp.is_some_and(|value| value < self.threshold.as_str())
    }
}

pub fn classify(
    record: &ChildRecord,
    parents: &ParentKeySet,
    cutoff: Option<&StalenessCutoff>,
) -> Verdict {
    if parents.contains(&record.reference_key) {
        return Verdict::ParentExists;
    }
    match cutoff {
        Some(cutoff) if !cutoff.is_stale(record.timestamp.as_deref()) => Verdict::Fresh,
        _ => Verdict::Orphan,
    }
}

pub fn is_orphan(
    record: &ChildRecord,
    parents: &ParentKeySet,
    cutoff: Option<&StalenessCutoff>,
) -> bool {
    classify(record, parents, cutoff) == Verdict::Orphan
}
