//! Coverage matcher: traffic demand per size vs. creative inventory

use super::sizes::{canonical_label, nearest_within, CreativeSize};
use super::window::AnalysisWindow;
use crate::catalog::Inventory;
use crate::config::{CoverageThresholds, VolumeBasis};
use crate::store::types::{GroupedMeasures, UNKNOWN};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Include,
    CreateCreative,
    Consider,
    UseFlexibleCreative,
    Ignore,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Include => "include",
            Recommendation::CreateCreative => "create_creative",
            Recommendation::Consider => "consider",
            Recommendation::UseFlexibleCreative => "use_flexible_creative",
            Recommendation::Ignore => "ignore",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageRecord {
    pub size: String,
    pub reached: i64,
    pub impressions: i64,
    /// impressions / reached as a fraction
    pub efficiency: f64,
    pub servable: bool,
    pub creative_count: u32,
    pub addressable: bool,
    /// Reached minus impressions for unservable sizes, never negative
    pub waste: i64,
    /// Volume compared against the thresholds (total or daily mean)
    pub volume: f64,
    pub near_miss: Option<String>,
    pub recommendation: Recommendation,
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub window_days: u32,
    pub observed_days: usize,
    /// Sorted by reached, largest first
    pub records: Vec<CoverageRecord>,
    pub total_reached: i64,
    pub servable_reached: i64,
    pub total_waste: i64,
    /// servable_reached / total_reached, 0 without traffic
    pub match_rate: f64,
    pub sizes_in_inventory: usize,
    pub sizes_in_traffic: usize,
    pub servable_sizes: usize,
    pub unservable_sizes: usize,
    /// Servable, addressable sizes for the routing INCLUDE list
    pub include_list: Vec<String>,
    pub top_opportunities: Vec<CoverageRecord>,
    pub insufficient_data: bool,
}

impl CoverageReport {
    pub fn record(&self, size: &str) -> Option<&CoverageRecord> {
        let label = canonical_label(size);
        self.records.iter().find(|r| r.size == label)
    }
}

pub struct CoverageMatcher {
    thresholds: CoverageThresholds,
    addressable: Option<HashSet<String>>,
}

impl CoverageMatcher {
    pub fn new(thresholds: CoverageThresholds) -> Self {
        let addressable = thresholds
            .addressable_sizes
            .as_ref()
            .map(|sizes| sizes.iter().map(|s| canonical_label(s)).collect());
        Self {
            thresholds,
            addressable,
        }
    }

    /// Whether the routing layer can target this size.
    pub fn is_addressable(&self, size: &str) -> bool {
        match &self.addressable {
            Some(set) => set.contains(&canonical_label(size)),
            None => CreativeSize::parse(size).is_some(),
        }
    }

    /// `by_size` holds window sums grouped by creative size.
    pub fn analyze(
        &self,
        window: &AnalysisWindow,
        observed_days: usize,
        by_size: &[GroupedMeasures],
        inventory: &Inventory,
    ) -> CoverageReport {
        let mut sizes: BTreeMap<String, (i64, i64)> = BTreeMap::new();
        for group in by_size {
            let label = group
                .values
                .first()
                .map(|s| canonical_label(s))
                .unwrap_or_default();
            let entry = sizes.entry(label).or_insert((0, 0));
            entry.0 += group.measures.reached_queries;
            entry.1 += group.measures.impressions;
        }

        let servable_dims = inventory.servable_dimensions();
        let mut records: Vec<CoverageRecord> = sizes
            .into_iter()
            .map(|(size, (reached, impressions))| {
                self.classify(size, reached, impressions, window, inventory, &servable_dims)
            })
            .collect();
        records.sort_by(|a, b| b.reached.cmp(&a.reached).then_with(|| a.size.cmp(&b.size)));

        let total_reached: i64 = records.iter().map(|r| r.reached).sum();
        let servable_reached: i64 = records.iter().filter(|r| r.servable).map(|r| r.reached).sum();
        let total_waste: i64 = records.iter().map(|r| r.waste).sum();
        let match_rate = if total_reached > 0 {
            (servable_reached as f64 / total_reached as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let servable_sizes = records.iter().filter(|r| r.servable).count();
        let include_list: Vec<String> = inventory
            .servable_sizes()
            .into_iter()
            .filter(|s| self.is_addressable(s))
            .map(str::to_string)
            .collect();

        let mut top_opportunities: Vec<CoverageRecord> = records
            .iter()
            .filter(|r| {
                matches!(
                    r.recommendation,
                    Recommendation::CreateCreative
                        | Recommendation::Consider
                        | Recommendation::UseFlexibleCreative
                )
            })
            .cloned()
            .collect();
        top_opportunities.sort_by(|a, b| b.waste.cmp(&a.waste).then_with(|| a.size.cmp(&b.size)));
        top_opportunities.truncate(self.thresholds.top_opportunities);

        let min_days = self.thresholds.min_observed_days.max(1) as usize;

        CoverageReport {
            window_start: window.start(),
            window_end: window.end(),
            window_days: window.days,
            observed_days,
            sizes_in_inventory: inventory.len(),
            sizes_in_traffic: records.len(),
            servable_sizes,
            unservable_sizes: records.len() - servable_sizes,
            records,
            total_reached,
            servable_reached,
            total_waste,
            match_rate,
            include_list,
            top_opportunities,
            insufficient_data: observed_days < min_days || total_reached == 0,
        }
    }

    fn classify(
        &self,
        size: String,
        reached: i64,
        impressions: i64,
        window: &AnalysisWindow,
        inventory: &Inventory,
        servable_dims: &[CreativeSize],
    ) -> CoverageRecord {
        let creative_count = inventory.count(&size);
        let servable = creative_count > 0;
        let addressable = self.is_addressable(&size);
        let waste = if servable { 0 } else { (reached - impressions).max(0) };
        let efficiency = if reached > 0 {
            impressions as f64 / reached as f64
        } else {
            0.0
        };
        let volume = match self.thresholds.volume_basis {
            VolumeBasis::WindowTotal => reached as f64,
            VolumeBasis::DailyAverage => reached as f64 / f64::from(window.days.max(1)),
        };
        let near_miss = CreativeSize::parse(&size)
            .and_then(|dims| nearest_within(&dims, servable_dims, self.thresholds.near_miss_px))
            .map(|c| c.to_string());

        let high = volume >= self.thresholds.high_volume as f64;
        let medium = volume >= self.thresholds.medium_volume as f64;

        let (recommendation, priority) = if servable {
            (Recommendation::Include, None)
        } else if size == UNKNOWN {
            // no creative can be built for a size the export never named
            (Recommendation::Ignore, None)
        } else if high && addressable && near_miss.is_some() {
            (Recommendation::UseFlexibleCreative, Some(Priority::High))
        } else if high && addressable {
            (Recommendation::CreateCreative, Some(Priority::High))
        } else if medium {
            (Recommendation::Consider, Some(Priority::Medium))
        } else if near_miss.is_some() {
            (Recommendation::UseFlexibleCreative, Some(Priority::Low))
        } else {
            (Recommendation::Ignore, None)
        };

        CoverageRecord {
            size,
            reached,
            impressions,
            efficiency,
            servable,
            creative_count,
            addressable,
            waste,
            volume,
            near_miss,
            recommendation,
            priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::Measures;

    fn window() -> AnalysisWindow {
        AnalysisWindow::trailing(NaiveDate::from_ymd_opt(2025, 11, 7).unwrap(), 7)
    }

    fn group(size: &str, reached: i64, impressions: i64) -> GroupedMeasures {
        GroupedMeasures {
            values: vec![size.to_string()],
            measures: Measures {
                reached_queries: reached,
                impressions,
                ..Default::default()
            },
        }
    }

    fn inventory() -> Inventory {
        Inventory::from_pairs([("300x250", 127), ("320x50", 89)])
    }

    #[test]
    fn test_recommendation_tiers() {
        let matcher = CoverageMatcher::new(CoverageThresholds::default());
        let report = matcher.analyze(
            &window(),
            7,
            &[
                group("300x250", 50_000, 40_000),
                group("360x300", 12_000, 0),
                group("321x50", 20_000, 0),
                group("Native", 3_000, 100),
                group("319x51", 500, 0),
                group("970x250", 200, 0),
            ],
            &inventory(),
        );

        let rec = |s: &str| report.record(s).unwrap().recommendation;
        assert_eq!(rec("300x250"), Recommendation::Include);
        assert_eq!(rec("360x300"), Recommendation::CreateCreative);
        assert_eq!(rec("321x50"), Recommendation::UseFlexibleCreative);
        assert_eq!(report.record("321x50").unwrap().priority, Some(Priority::High));
        assert_eq!(report.record("321x50").unwrap().near_miss.as_deref(), Some("320x50"));
        assert_eq!(rec("Native"), Recommendation::Consider);
        assert!(!report.record("Native").unwrap().addressable);
        assert_eq!(rec("319x51"), Recommendation::UseFlexibleCreative);
        assert_eq!(report.record("319x51").unwrap().priority, Some(Priority::Low));
        assert_eq!(rec("970x250"), Recommendation::Ignore);
    }

    #[test]
    fn test_daily_average_basis() {
        let thresholds = CoverageThresholds {
            volume_basis: VolumeBasis::DailyAverage,
            ..Default::default()
        };
        let report = CoverageMatcher::new(thresholds).analyze(
            &window(),
            7,
            &[group("360x300", 11_584, 0)],
            &inventory(),
        );
        // 11,584 / 7 days is ~1,655 per day: medium, not high
        assert_eq!(report.records[0].recommendation, Recommendation::Consider);
    }

    #[test]
    fn test_addressable_preset_limits_create() {
        let thresholds = CoverageThresholds {
            addressable_sizes: Some(crate::analysis::sizes::standard_addressable_sizes()),
            ..Default::default()
        };
        let matcher = CoverageMatcher::new(thresholds);
        let report = matcher.analyze(&window(), 7, &[group("360x300", 11_584, 0)], &inventory());
        assert_eq!(report.records[0].recommendation, Recommendation::Consider);
        assert_eq!(report.include_list, vec!["300x250", "320x50"]);
    }

    #[test]
    fn test_bounds_hold_for_odd_inputs() {
        let matcher = CoverageMatcher::new(CoverageThresholds::default());
        // impressions above reached on an unservable size must not go negative
        let report = matcher.analyze(
            &window(),
            1,
            &[group("728x90", 10, 25), group("300x250", 0, 0)],
            &inventory(),
        );
        assert!(report.records.iter().all(|r| r.waste >= 0));
        assert_eq!(report.total_waste, 0);
        assert!((0.0..=1.0).contains(&report.match_rate));

        let empty = matcher.analyze(&window(), 0, &[], &inventory());
        assert_eq!(empty.match_rate, 0.0);
        assert!(empty.insufficient_data);
    }

    #[test]
    fn test_unknown_size_is_ignored() {
        let matcher = CoverageMatcher::new(CoverageThresholds::default());
        let report = matcher.analyze(&window(), 1, &[group(UNKNOWN, 50_000, 100)], &inventory());

        let unknown = report.record(UNKNOWN).unwrap();
        assert_eq!(unknown.recommendation, Recommendation::Ignore);
        assert_eq!(unknown.priority, None);
        assert_eq!(unknown.waste, 49_900);
        assert!(report.top_opportunities.is_empty());
    }

    #[test]
    fn test_duplicate_labels_merge() {
        let matcher = CoverageMatcher::new(CoverageThresholds::default());
        let report = matcher.analyze(
            &window(),
            7,
            &[group("300x250", 10, 5), group("300X250", 10, 5)],
            &inventory(),
        );
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].reached, 20);
    }
}
