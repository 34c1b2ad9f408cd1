//! Anomaly signal detection over daily aggregates
//!
//! Four advisory checks run per signal key across the window:
//! - clicks exceeding impressions on a day
//! - CTR above an absolute ceiling or a multiple of the median CTR
//! - heavy impression volume with zero clicks
//! - spend on days without a single impression
//!
//! Findings are evidence for a human reviewer, never an automated verdict.

use super::scorer::ConfidenceScorer;
use super::signals::{SignalFinding, SignalKey, SignalType};
use super::window::AnalysisWindow;
use crate::config::SignalThresholds;
use crate::store::types::{Dimension, GroupedMeasures, Measures, DATE_FORMAT, UNKNOWN};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Detector output before persistence.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Detection {
    pub findings: Vec<SignalFinding>,
    pub keys_evaluated: usize,
    /// Keys whose every dimension was UNKNOWN
    pub skipped_unknown: usize,
    /// Median CTR across keys above the impressions floor
    pub baseline_ctr: Option<f64>,
}

struct KeySeries {
    key: SignalKey,
    days: BTreeMap<NaiveDate, Measures>,
    total: Measures,
}

pub struct SignalDetector {
    thresholds: SignalThresholds,
    scorer: ConfidenceScorer,
}

impl SignalDetector {
    pub fn new(thresholds: SignalThresholds) -> Self {
        let scorer = ConfidenceScorer::new(&thresholds);
        Self { thresholds, scorer }
    }

    fn key_dimensions(&self) -> Vec<Dimension> {
        let mut dims: Vec<Dimension> = self
            .thresholds
            .key_dimensions
            .iter()
            .copied()
            .filter(|d| *d != Dimension::Date)
            .collect();
        dims.dedup();
        if dims.is_empty() {
            dims.push(Dimension::App);
        }
        dims
    }

    /// Group-by the store must run for [`detect`](Self::detect): key
    /// dimensions followed by the date.
    pub fn grouping(&self) -> Vec<Dimension> {
        let mut dims = self.key_dimensions();
        dims.push(Dimension::Date);
        dims
    }

    /// `daily` rows are grouped per [`grouping`](Self::grouping).
    pub fn detect(
        &self,
        window: &AnalysisWindow,
        daily: &[GroupedMeasures],
        app_names: &HashMap<String, String>,
    ) -> Detection {
        let dims = self.key_dimensions();
        let mut series: BTreeMap<Vec<String>, KeySeries> = BTreeMap::new();
        let mut skipped: BTreeSet<Vec<String>> = BTreeSet::new();

        for group in daily {
            let Some((date_value, key_values)) = group.values.split_last() else {
                continue;
            };
            let Ok(date) = NaiveDate::parse_from_str(date_value, DATE_FORMAT) else {
                log::warn!("⚠️  Skipping signal row with unparsable date '{}'", date_value);
                continue;
            };
            if !window.range.contains(date) || key_values.len() != dims.len() {
                continue;
            }
            if key_values.iter().all(|v| v == UNKNOWN) {
                skipped.insert(key_values.to_vec());
                continue;
            }

            let entry = series.entry(key_values.to_vec()).or_insert_with(|| KeySeries {
                key: SignalKey::new(dims.iter().copied().zip(key_values.iter().cloned()).collect()),
                days: BTreeMap::new(),
                total: Measures::default(),
            });
            *entry.days.entry(date).or_default() += group.measures;
            entry.total += group.measures;
        }

        let baseline_ctr = median(
            series
                .values()
                .filter(|s| s.total.impressions >= self.thresholds.extreme_ctr_min_impressions)
                .filter_map(|s| s.total.ctr())
                .collect(),
        );

        let mut findings = Vec::new();
        for s in series.values() {
            let app_name = s
                .key
                .value(Dimension::App)
                .and_then(|app| app_names.get(app))
                .cloned();
            let mut emit = |signal_type: SignalType, occurrences: u32, magnitude: f64, evidence: serde_json::Value| {
                let mut evidence = evidence;
                if let (Some(name), Some(map)) = (&app_name, evidence.as_object_mut()) {
                    map.insert("app_name".to_string(), json!(name));
                }
                findings.push(SignalFinding {
                    key: s.key.clone(),
                    signal_type,
                    confidence: self.scorer.score(occurrences, magnitude),
                    evidence,
                    days_observed: s.days.len() as u32,
                    window_start: window.start(),
                    window_end: window.end(),
                });
            };

            self.check_clicks_exceed(s, &mut emit);
            self.check_extreme_ctr(s, baseline_ctr, &mut emit);
            self.check_zero_engagement(s, &mut emit);
            self.check_spend_without_delivery(s, &mut emit);
        }

        findings.sort_by(|a, b| a.signal_type.cmp(&b.signal_type).then_with(|| a.key.cmp(&b.key)));

        log::debug!(
            "🔎 Evaluated {} signal keys, {} findings, {} all-UNKNOWN keys skipped",
            series.len(),
            findings.len(),
            skipped.len()
        );

        Detection {
            findings,
            keys_evaluated: series.len(),
            skipped_unknown: skipped.len(),
            baseline_ctr,
        }
    }

    fn check_clicks_exceed<F>(&self, s: &KeySeries, emit: &mut F)
    where
        F: FnMut(SignalType, u32, f64, serde_json::Value),
    {
        let violations: Vec<(&NaiveDate, &Measures)> =
            s.days.iter().filter(|(_, m)| m.clicks > m.impressions).collect();
        if violations.is_empty() {
            return;
        }
        let worst_ratio = violations
            .iter()
            .map(|(_, m)| m.clicks as f64 / m.impressions.max(1) as f64)
            .fold(0.0, f64::max);
        let dates: Vec<String> = violations
            .iter()
            .map(|(d, _)| d.format(DATE_FORMAT).to_string())
            .collect();
        emit(
            SignalType::ClicksExceedImpressions,
            violations.len() as u32,
            worst_ratio,
            json!({
                "violation_days": violations.len(),
                "days_observed": s.days.len(),
                "dates": dates,
                "worst_ratio": worst_ratio,
                "clicks": s.total.clicks,
                "impressions": s.total.impressions,
            }),
        );
    }

    fn check_extreme_ctr<F>(&self, s: &KeySeries, baseline: Option<f64>, emit: &mut F)
    where
        F: FnMut(SignalType, u32, f64, serde_json::Value),
    {
        if s.total.impressions < self.thresholds.extreme_ctr_min_impressions {
            return;
        }
        let Some(ctr) = s.total.ctr() else {
            return;
        };

        let mut threshold = self.thresholds.extreme_ctr_absolute;
        if let Some(b) = baseline.filter(|b| *b > 0.0) {
            threshold = threshold.min(b * self.thresholds.extreme_ctr_baseline_multiple);
        }
        if threshold <= 0.0 || ctr <= threshold {
            return;
        }

        let extreme_days = s
            .days
            .values()
            .filter(|m| m.ctr().map(|c| c > threshold).unwrap_or(false))
            .count() as u32;
        let magnitude = ctr / threshold;
        emit(
            SignalType::ExtremeCtr,
            extreme_days.max(1),
            magnitude,
            json!({
                "ctr": ctr,
                "threshold": threshold,
                "baseline_ctr": baseline,
                "extreme_days": extreme_days,
                "days_observed": s.days.len(),
                "clicks": s.total.clicks,
                "impressions": s.total.impressions,
            }),
        );
    }

    fn check_zero_engagement<F>(&self, s: &KeySeries, emit: &mut F)
    where
        F: FnMut(SignalType, u32, f64, serde_json::Value),
    {
        let floor = self.thresholds.zero_engagement_min_impressions;
        if s.total.clicks != 0 || s.total.impressions < floor {
            return;
        }
        let active_days = s.days.values().filter(|m| m.impressions > 0).count() as u32;
        if active_days < self.thresholds.zero_engagement_min_days.max(1) {
            return;
        }
        let magnitude = s.total.impressions as f64 / floor.max(1) as f64;
        emit(
            SignalType::ZeroEngagementAtVolume,
            active_days,
            magnitude,
            json!({
                "impressions": s.total.impressions,
                "clicks": 0,
                "active_days": active_days,
                "impression_floor": floor,
            }),
        );
    }

    fn check_spend_without_delivery<F>(&self, s: &KeySeries, emit: &mut F)
    where
        F: FnMut(SignalType, u32, f64, serde_json::Value),
    {
        let days: Vec<(&NaiveDate, &Measures)> = s
            .days
            .iter()
            .filter(|(_, m)| m.spend_micros > 0 && m.impressions == 0)
            .collect();
        if days.is_empty() {
            return;
        }
        let spend_micros: i64 = days.iter().map(|(_, m)| m.spend_micros).sum();
        let dates: Vec<String> = days.iter().map(|(d, _)| d.format(DATE_FORMAT).to_string()).collect();
        emit(
            SignalType::SpendWithoutDelivery,
            days.len() as u32,
            0.0,
            json!({
                "days": days.len(),
                "dates": dates,
                "spend_micros": spend_micros,
            }),
        );
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::signals::Confidence;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, d).unwrap()
    }

    fn window() -> AnalysisWindow {
        AnalysisWindow::trailing(day(7), 7)
    }

    fn row(app: &str, d: u32, impressions: i64, clicks: i64) -> GroupedMeasures {
        GroupedMeasures {
            values: vec![app.to_string(), day(d).format(DATE_FORMAT).to_string()],
            measures: Measures {
                reached_queries: impressions * 2,
                impressions,
                clicks,
                ..Default::default()
            },
        }
    }

    fn detector() -> SignalDetector {
        SignalDetector::new(SignalThresholds::default())
    }

    fn of_type(detection: &Detection, t: SignalType) -> Vec<&SignalFinding> {
        detection.findings.iter().filter(|f| f.signal_type == t).collect()
    }

    #[test]
    fn test_grouping_appends_date() {
        assert_eq!(detector().grouping(), vec![Dimension::App, Dimension::Date]);
    }

    #[test]
    fn test_clicks_exceed_confidence_follows_occurrences() {
        let mut rows = Vec::new();
        for d in 1..=7 {
            // app.x misbehaves once, app.y on four days
            rows.push(row("app.x", d, 1_000, if d == 3 { 1_500 } else { 10 }));
            rows.push(row("app.y", d, 1_000, if d <= 4 { 1_200 } else { 10 }));
        }
        let detection = detector().detect(&window(), &rows, &HashMap::new());
        let found = of_type(&detection, SignalType::ClicksExceedImpressions);
        assert_eq!(found.len(), 2);

        let x = found.iter().find(|f| f.key.value(Dimension::App) == Some("app.x")).unwrap();
        assert_eq!(x.confidence, Confidence::Low);
        assert_eq!(x.evidence["violation_days"], 1);
        assert_eq!(x.days_observed, 7);

        let y = found.iter().find(|f| f.key.value(Dimension::App) == Some("app.y")).unwrap();
        assert_eq!(y.confidence, Confidence::High);
        assert_eq!(y.evidence["violation_days"], 4);
    }

    #[test]
    fn test_large_magnitude_escalates_repeated_violations() {
        let rows = vec![row("app.z", 2, 100, 500), row("app.z", 3, 100, 300)];
        let detection = detector().detect(&window(), &rows, &HashMap::new());
        let found = of_type(&detection, SignalType::ClicksExceedImpressions);
        assert_eq!(found[0].confidence, Confidence::High);
    }

    #[test]
    fn test_single_day_violation_stays_low_at_any_ratio() {
        // clicks reported against a day with no impressions yet
        let mut rows: Vec<GroupedMeasures> = (1..=7)
            .map(|d| row("app.skew", d, 1_000, if d == 3 { 0 } else { 5 }))
            .collect();
        rows[2].measures.impressions = 0;
        rows[2].measures.clicks = 2;

        let detection = detector().detect(&window(), &rows, &HashMap::new());
        let found = of_type(&detection, SignalType::ClicksExceedImpressions);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].evidence["violation_days"], 1);
        assert!(found[0].evidence["worst_ratio"].as_f64().unwrap() >= 2.0);
        assert_eq!(found[0].confidence, Confidence::Low);
    }

    #[test]
    fn test_extreme_ctr_uses_median_baseline() {
        let mut rows: Vec<GroupedMeasures> = (0..5)
            .map(|i| row(&format!("app.{}", i), 1, 100_000, 100))
            .collect();
        rows.push(row("app.hot", 1, 10_000, 500));

        let detection = detector().detect(&window(), &rows, &HashMap::new());
        assert!((detection.baseline_ctr.unwrap() - 0.001).abs() < 1e-12);
        let found = of_type(&detection, SignalType::ExtremeCtr);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key.render(), "app=app.hot");
        let threshold = found[0].evidence["threshold"].as_f64().unwrap();
        assert!((threshold - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_extreme_ctr_ignores_low_volume() {
        let rows = vec![row("app.tiny", 1, 50, 40), row("app.big", 1, 10_000, 10)];
        let detection = detector().detect(&window(), &rows, &HashMap::new());
        assert!(of_type(&detection, SignalType::ExtremeCtr).is_empty());
    }

    #[test]
    fn test_zero_engagement_at_volume() {
        let rows = vec![
            row("app.silent", 1, 3_000, 0),
            row("app.silent", 2, 3_000, 0),
            row("app.small", 1, 4_000, 0),
        ];
        let mut names = HashMap::new();
        names.insert("app.silent".to_string(), "Silent Game".to_string());

        let detection = detector().detect(&window(), &rows, &names);
        let found = of_type(&detection, SignalType::ZeroEngagementAtVolume);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].evidence["impressions"], 6_000);
        assert_eq!(found[0].evidence["app_name"], "Silent Game");
        assert_eq!(found[0].confidence, Confidence::Medium);
    }

    #[test]
    fn test_spend_without_delivery() {
        let mut spent = row("app.leak", 4, 0, 0);
        spent.measures.spend_micros = 2_500_000;
        let detection = detector().detect(&window(), &[spent], &HashMap::new());
        let found = of_type(&detection, SignalType::SpendWithoutDelivery);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].evidence["spend_micros"], 2_500_000);
        assert_eq!(found[0].confidence, Confidence::Low);
    }

    #[test]
    fn test_all_unknown_keys_are_skipped() {
        let rows = vec![row(UNKNOWN, 1, 10, 50), row(UNKNOWN, 2, 10, 50)];
        let detection = detector().detect(&window(), &rows, &HashMap::new());
        assert!(detection.findings.is_empty());
        assert_eq!(detection.skipped_unknown, 1);
        assert_eq!(detection.keys_evaluated, 0);
    }

    #[test]
    fn test_rows_outside_window_ignored() {
        let rows = vec![row("app.old", 20, 10, 50)];
        let detection = detector().detect(&window(), &rows, &HashMap::new());
        assert!(detection.findings.is_empty());
    }

    #[test]
    fn test_median() {
        assert_eq!(median(vec![]), None);
        assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(vec![4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }
}
