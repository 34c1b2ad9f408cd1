//! Canonical aggregate key and measures

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Sentinel substituted for every absent or blank dimension value.
pub const UNKNOWN: &str = "UNKNOWN";

/// Stored date format (sorts lexicographically).
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Replace a missing/blank dimension value with [`UNKNOWN`].
///
/// An explicit "unknown" in any letter case collapses to the same sentinel.
pub fn dimension_or_unknown(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() && !v.eq_ignore_ascii_case(UNKNOWN) => v.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrafficKey {
    pub date: NaiveDate,
    pub routing_config_id: String,
    pub creative_size: String,
    pub country: String,
    pub platform: String,
    pub environment: String,
    pub app_id: String,
}

impl TrafficKey {
    /// Build a key, defaulting every missing dimension to [`UNKNOWN`].
    pub fn new(
        date: NaiveDate,
        routing_config_id: Option<&str>,
        creative_size: Option<&str>,
        country: Option<&str>,
        platform: Option<&str>,
        environment: Option<&str>,
        app_id: Option<&str>,
    ) -> Self {
        Self {
            date,
            routing_config_id: dimension_or_unknown(routing_config_id),
            creative_size: dimension_or_unknown(creative_size),
            country: dimension_or_unknown(country),
            platform: dimension_or_unknown(platform),
            environment: dimension_or_unknown(environment),
            app_id: dimension_or_unknown(app_id),
        }
    }

    /// Value of a single dimension, dates rendered in [`DATE_FORMAT`].
    pub fn value(&self, dimension: Dimension) -> String {
        match dimension {
            Dimension::Date => self.date.format(DATE_FORMAT).to_string(),
            Dimension::RoutingConfig => self.routing_config_id.clone(),
            Dimension::CreativeSize => self.creative_size.clone(),
            Dimension::Country => self.country.clone(),
            Dimension::Platform => self.platform.clone(),
            Dimension::Environment => self.environment.clone(),
            Dimension::App => self.app_id.clone(),
        }
    }
}

/// Additive measures. Merging is field-wise addition, never overwrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measures {
    pub reached_queries: i64,
    pub impressions: i64,
    pub clicks: i64,
    pub spend_micros: i64,
    pub video_starts: i64,
    pub video_completions: i64,
    pub error_count: i64,
}

impl Measures {
    pub fn is_zero(&self) -> bool {
        *self == Measures::default()
    }

    /// impressions / reached as a fraction, 0 when nothing was reached.
    pub fn efficiency(&self) -> f64 {
        if self.reached_queries > 0 {
            self.impressions as f64 / self.reached_queries as f64
        } else {
            0.0
        }
    }

    /// clicks / impressions as a fraction, `None` without impressions.
    pub fn ctr(&self) -> Option<f64> {
        if self.impressions > 0 {
            Some(self.clicks as f64 / self.impressions as f64)
        } else {
            None
        }
    }
}

/// Saturating, so a pathological merge pins at the bound instead of wrapping.
impl AddAssign for Measures {
    fn add_assign(&mut self, rhs: Self) {
        self.reached_queries = self.reached_queries.saturating_add(rhs.reached_queries);
        self.impressions = self.impressions.saturating_add(rhs.impressions);
        self.clicks = self.clicks.saturating_add(rhs.clicks);
        self.spend_micros = self.spend_micros.saturating_add(rhs.spend_micros);
        self.video_starts = self.video_starts.saturating_add(rhs.video_starts);
        self.video_completions = self.video_completions.saturating_add(rhs.video_completions);
        self.error_count = self.error_count.saturating_add(rhs.error_count);
    }
}

impl Add for Measures {
    type Output = Measures;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl std::iter::Sum for Measures {
    fn sum<I: Iterator<Item = Measures>>(iter: I) -> Self {
        iter.fold(Measures::default(), Add::add)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficAggregate {
    pub key: TrafficKey,
    pub measures: Measures,
}

/// Groupable dimensions of the aggregate key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Date,
    RoutingConfig,
    CreativeSize,
    Country,
    Platform,
    Environment,
    App,
}

impl Dimension {
    pub fn column(&self) -> &'static str {
        match self {
            Dimension::Date => "metric_date",
            Dimension::RoutingConfig => "routing_config_id",
            Dimension::CreativeSize => "creative_size",
            Dimension::Country => "country",
            Dimension::Platform => "platform",
            Dimension::Environment => "environment",
            Dimension::App => "app_id",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Date => "date",
            Dimension::RoutingConfig => "config",
            Dimension::CreativeSize => "size",
            Dimension::Country => "country",
            Dimension::Platform => "platform",
            Dimension::Environment => "environment",
            Dimension::App => "app",
        }
    }
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// One row of a group-by query: the grouped dimension values in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedMeasures {
    pub values: Vec<String>,
    pub measures: Measures,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, d).unwrap()
    }

    #[test]
    fn test_missing_and_explicit_unknown_collapse() {
        let missing = TrafficKey::new(day(1), Some("cfg"), Some("300x250"), None, Some(""), None, None);
        let explicit = TrafficKey::new(
            day(1),
            Some("cfg"),
            Some("300x250"),
            Some("UNKNOWN"),
            Some("unknown"),
            Some("  "),
            Some("UNKNOWN"),
        );
        assert_eq!(missing, explicit);
        assert_eq!(missing.country, UNKNOWN);
    }

    #[test]
    fn test_measures_merge_add() {
        let a = Measures { reached_queries: 10, impressions: 4, clicks: 1, ..Default::default() };
        let b = Measures { reached_queries: 5, impressions: 1, spend_micros: 250_000, ..Default::default() };
        let merged = a + b;
        assert_eq!(merged.reached_queries, 15);
        assert_eq!(merged.impressions, 5);
        assert_eq!(merged.clicks, 1);
        assert_eq!(merged.spend_micros, 250_000);
        assert_eq!(vec![a, b].into_iter().sum::<Measures>(), merged);
    }

    #[test]
    fn test_measures_add_saturates() {
        let big = Measures { reached_queries: i64::MAX - 1, clicks: 3, ..Default::default() };
        let merged = big + big;
        assert_eq!(merged.reached_queries, i64::MAX);
        assert_eq!(merged.clicks, 6);
    }

    #[test]
    fn test_efficiency_and_ctr() {
        let m = Measures { reached_queries: 107_663, impressions: 80_062, clicks: 0, ..Default::default() };
        assert!((m.efficiency() * 100.0 - 74.36).abs() < 0.01);
        assert_eq!(m.ctr(), Some(0.0));
        assert_eq!(Measures::default().ctr(), None);
        assert_eq!(Measures::default().efficiency(), 0.0);
    }

    #[test]
    fn test_date_range_days() {
        let range = DateRange::new(day(1), day(7));
        assert_eq!(range.days(), 7);
        assert!(range.contains(day(7)));
        assert!(!range.contains(day(8)));
    }
}
