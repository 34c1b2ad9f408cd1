//! Trailing day windows for analysis runs

use crate::store::types::DateRange;
use chrono::{Duration, NaiveDate};

/// `days` calendar days ending at `anchor`, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisWindow {
    pub days: u32,
    pub range: DateRange,
}

impl AnalysisWindow {
    /// A zero-day request is widened to one day.
    pub fn trailing(anchor: NaiveDate, days: u32) -> Self {
        let days = days.max(1);
        let start = anchor - Duration::days(i64::from(days) - 1);
        Self {
            days,
            range: DateRange::new(start, anchor),
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.range.start
    }

    pub fn end(&self) -> NaiveDate {
        self.range.end
    }
}

/// Windows end at the latest stored date, but never after `today`.
pub fn resolve_anchor(today: NaiveDate, latest_stored: Option<NaiveDate>) -> NaiveDate {
    match latest_stored {
        Some(latest) if latest < today => latest,
        _ => today,
    }
}
