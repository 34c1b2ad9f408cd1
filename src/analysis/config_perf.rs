//! Per-routing-config performance over a window

use super::routing::RoutingSet;
use super::window::AnalysisWindow;
use crate::config::ConfigThresholds;
use crate::store::types::{GroupedMeasures, Measures};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ConfigIssue {
    /// Configured but no traffic in the window
    NoData,
    LowEfficiency { efficiency: f64 },
    LowVolume { reached: i64 },
    /// Traffic attributed to an id the routing set does not define
    UnknownRoutingConfig,
}

impl ConfigIssue {
    pub fn label(&self) -> &'static str {
        match self {
            ConfigIssue::NoData => "no data",
            ConfigIssue::LowEfficiency { .. } => "low efficiency",
            ConfigIssue::LowVolume { .. } => "low volume",
            ConfigIssue::UnknownRoutingConfig => "unknown config",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigPerformance {
    pub config_id: String,
    pub name: Option<String>,
    pub state: Option<&'static str>,
    pub measures: Measures,
    pub efficiency: f64,
    pub ctr: Option<f64>,
    pub issues: Vec<ConfigIssue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigPerformanceReport {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub configs: Vec<ConfigPerformance>,
}

impl ConfigPerformanceReport {
    pub fn config(&self, id: &str) -> Option<&ConfigPerformance> {
        self.configs.iter().find(|c| c.config_id == id)
    }
}

/// `by_config` holds window sums grouped by routing config id.
pub fn config_performance(
    window: &AnalysisWindow,
    by_config: &[GroupedMeasures],
    routing: &RoutingSet,
    thresholds: &ConfigThresholds,
) -> ConfigPerformanceReport {
    let mut observed: BTreeMap<String, Measures> = BTreeMap::new();
    for group in by_config {
        let id = group.values.first().cloned().unwrap_or_default();
        *observed.entry(id).or_default() += group.measures;
    }

    let mut configs: Vec<ConfigPerformance> = Vec::new();

    for config in routing.configs() {
        let measures = observed.remove(&config.id).unwrap_or_default();
        let mut issues = Vec::new();
        if measures.reached_queries == 0 && measures.impressions == 0 {
            issues.push(ConfigIssue::NoData);
        } else {
            check_thresholds(&measures, thresholds, &mut issues);
        }
        configs.push(ConfigPerformance {
            config_id: config.id.clone(),
            name: Some(config.name.clone()),
            state: Some(config.state.as_str()),
            efficiency: measures.efficiency(),
            ctr: measures.ctr(),
            measures,
            issues,
        });
    }

    for (id, measures) in observed {
        let mut issues = vec![ConfigIssue::UnknownRoutingConfig];
        check_thresholds(&measures, thresholds, &mut issues);
        configs.push(ConfigPerformance {
            config_id: id,
            name: None,
            state: None,
            efficiency: measures.efficiency(),
            ctr: measures.ctr(),
            measures,
            issues,
        });
    }

    configs.sort_by(|a, b| {
        b.measures
            .reached_queries
            .cmp(&a.measures.reached_queries)
            .then_with(|| a.config_id.cmp(&b.config_id))
    });

    ConfigPerformanceReport {
        window_start: window.start(),
        window_end: window.end(),
        configs,
    }
}

fn check_thresholds(measures: &Measures, thresholds: &ConfigThresholds, issues: &mut Vec<ConfigIssue>) {
    if measures.reached_queries > 0 && measures.efficiency() < thresholds.low_efficiency {
        issues.push(ConfigIssue::LowEfficiency {
            efficiency: measures.efficiency(),
        });
    }
    if measures.reached_queries < thresholds.low_volume {
        issues.push(ConfigIssue::LowVolume {
            reached: measures.reached_queries,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::UNKNOWN;

    const ROUTING: &str = r#"
        [[endpoints]]
        id = "us-east"
        max_qps = 90000

        [[configs]]
        id = "A"
        name = "healthy"
        endpoint = "us-east"
        qps_limit = 1000

        [[configs]]
        id = "B"
        name = "leaky"
        endpoint = "us-east"
        qps_limit = 1000

        [[configs]]
        id = "C"
        name = "idle"
        endpoint = "us-east"
        qps_limit = 1000
        state = "suspended"
    "#;

    fn group(id: &str, reached: i64, impressions: i64) -> GroupedMeasures {
        GroupedMeasures {
            values: vec![id.to_string()],
            measures: Measures {
                reached_queries: reached,
                impressions,
                clicks: impressions / 100,
                ..Default::default()
            },
        }
    }

    fn window() -> AnalysisWindow {
        AnalysisWindow::trailing(NaiveDate::from_ymd_opt(2025, 11, 7).unwrap(), 7)
    }

    #[test]
    fn test_issues_per_config() {
        let routing = RoutingSet::from_toml(ROUTING).unwrap();
        let groups = vec![
            group("A", 10_000, 8_000),
            group("B", 20_000, 5_000),
            group(UNKNOWN, 50, 40),
        ];
        let report = config_performance(&window(), &groups, &routing, &ConfigThresholds::default());

        let ids: Vec<&str> = report.configs.iter().map(|c| c.config_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A", UNKNOWN, "C"]);

        assert!(report.config("A").unwrap().issues.is_empty());
        assert!(matches!(
            report.config("B").unwrap().issues.as_slice(),
            [ConfigIssue::LowEfficiency { .. }]
        ));
        assert_eq!(report.config("C").unwrap().issues, vec![ConfigIssue::NoData]);
        assert_eq!(report.config("C").unwrap().state, Some("suspended"));

        let unknown = report.config(UNKNOWN).unwrap();
        assert_eq!(unknown.name, None);
        assert_eq!(
            unknown.issues,
            vec![ConfigIssue::UnknownRoutingConfig, ConfigIssue::LowVolume { reached: 50 }]
        );
    }

    #[test]
    fn test_efficiency_within_bounds() {
        let routing = RoutingSet::default();
        let report = config_performance(
            &window(),
            &[group("X", 1_000, 600)],
            &routing,
            &ConfigThresholds::default(),
        );
        let x = report.config("X").unwrap();
        assert!((x.efficiency - 0.6).abs() < 1e-9);
        assert!(!x.issues.iter().any(|i| matches!(i, ConfigIssue::LowEfficiency { .. })));
        assert_eq!(x.ctr, Some(6.0 / 600.0));
    }
}
