//! Constraint evaluator: endpoint capacity and what-if size filter replays
//!
//! Everything here reads routing configuration and historical aggregates;
//! proposed filters are evaluated, never applied.

use super::routing::{RoutingConfig, RoutingSet, SizeFilter};
use super::sizes::canonical_label;
use super::window::AnalysisWindow;
use crate::store::types::{Dimension, GroupedMeasures, Measures};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Grouping used to replay traffic through routing predicates.
pub const SLICE_DIMENSIONS: [Dimension; 5] = [
    Dimension::RoutingConfig,
    Dimension::CreativeSize,
    Dimension::Country,
    Dimension::Platform,
    Dimension::Environment,
];

/// Window traffic for one combination of predicate dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficSlice {
    pub routing_config_id: String,
    pub size: String,
    pub country: String,
    pub platform: String,
    pub environment: String,
    pub measures: Measures,
}

impl TrafficSlice {
    /// From a row grouped by [`SLICE_DIMENSIONS`]; rows of another shape are skipped.
    pub fn from_group(group: &GroupedMeasures) -> Option<Self> {
        match group.values.as_slice() {
            [config, size, country, platform, environment] => Some(Self {
                routing_config_id: config.clone(),
                size: size.clone(),
                country: country.clone(),
                platform: platform.clone(),
                environment: environment.clone(),
                measures: group.measures,
            }),
            _ => None,
        }
    }
}

pub fn slices_from_groups(groups: &[GroupedMeasures]) -> Vec<TrafficSlice> {
    groups.iter().filter_map(TrafficSlice::from_group).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointCapacity {
    pub endpoint_id: String,
    pub max_qps: u64,
    /// Sum of qps_limit over active configs bound to the endpoint
    pub allocated_qps: u64,
    pub active_configs: Vec<String>,
    pub suspended_configs: Vec<String>,
    pub oversubscribed: bool,
    /// max_qps - allocated_qps; negative when oversubscribed
    pub headroom_qps: i64,
    /// Mean reached queries per second attributed to the bound configs
    pub observed_qps: f64,
    pub observed_utilization: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapacityReport {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub endpoints: Vec<EndpointCapacity>,
}

impl CapacityReport {
    pub fn endpoint(&self, id: &str) -> Option<&EndpointCapacity> {
        self.endpoints.iter().find(|e| e.endpoint_id == id)
    }

    pub fn any_oversubscribed(&self) -> bool {
        self.endpoints.iter().any(|e| e.oversubscribed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeChange {
    Retained,
    Lost,
    Gained,
    Unmatched,
}

impl SizeChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeChange::Retained => "retained",
            SizeChange::Lost => "lost",
            SizeChange::Gained => "gained",
            SizeChange::Unmatched => "unmatched",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizeDiff {
    pub size: String,
    pub reached: i64,
    pub currently_accepted: bool,
    pub proposed_accepted: bool,
    pub change: SizeChange,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterSimulation {
    /// `None` for a global replay over all traffic
    pub config_id: Option<String>,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub current_sizes: Vec<String>,
    pub proposed_sizes: Vec<String>,
    /// Current filter accepts all sizes and the proposal does not
    pub narrows_from_all: bool,
    /// Reached queries accepted by the current predicate
    pub baseline_reached: i64,
    pub retained_reached: i64,
    pub lost_reached: i64,
    pub gained_reached: i64,
    pub per_size: Vec<SizeDiff>,
    pub insufficient_data: bool,
}

impl FilterSimulation {
    /// Share of the baseline kept, 0 without baseline traffic.
    pub fn retained_fraction(&self) -> f64 {
        if self.baseline_reached > 0 {
            self.retained_reached as f64 / self.baseline_reached as f64
        } else {
            0.0
        }
    }

    pub fn size(&self, size: &str) -> Option<&SizeDiff> {
        let label = canonical_label(size);
        self.per_size.iter().find(|d| d.size == label)
    }
}

pub struct ConstraintEvaluator<'a> {
    routing: &'a RoutingSet,
}

impl<'a> ConstraintEvaluator<'a> {
    pub fn new(routing: &'a RoutingSet) -> Self {
        Self { routing }
    }

    /// Allocated qps vs. ceiling per endpoint, with observed traffic alongside.
    pub fn capacity(&self, window: &AnalysisWindow, slices: &[TrafficSlice]) -> CapacityReport {
        let seconds = f64::from(window.days) * SECONDS_PER_DAY;
        let mut reached_by_config: BTreeMap<&str, i64> = BTreeMap::new();
        for slice in slices {
            *reached_by_config.entry(slice.routing_config_id.as_str()).or_insert(0) +=
                slice.measures.reached_queries;
        }

        let endpoints = self
            .routing
            .endpoints()
            .map(|endpoint| {
                let (active, suspended): (Vec<&RoutingConfig>, Vec<&RoutingConfig>) = self
                    .routing
                    .configs_for_endpoint(&endpoint.id)
                    .partition(|c| c.is_active());
                let allocated_qps: u64 = active.iter().map(|c| c.qps_limit).sum();
                let observed_reached: i64 = active
                    .iter()
                    .chain(suspended.iter())
                    .map(|c| reached_by_config.get(c.id.as_str()).copied().unwrap_or(0))
                    .sum();
                let observed_qps = observed_reached as f64 / seconds;

                EndpointCapacity {
                    endpoint_id: endpoint.id.clone(),
                    max_qps: endpoint.max_qps,
                    allocated_qps,
                    active_configs: active.iter().map(|c| c.id.clone()).collect(),
                    suspended_configs: suspended.iter().map(|c| c.id.clone()).collect(),
                    oversubscribed: allocated_qps > endpoint.max_qps,
                    headroom_qps: endpoint.max_qps as i64 - allocated_qps as i64,
                    observed_qps,
                    observed_utilization: observed_qps / endpoint.max_qps as f64,
                }
            })
            .collect();

        CapacityReport {
            window_start: window.start(),
            window_end: window.end(),
            endpoints,
        }
    }

    /// Replay all window traffic through a proposed account-wide size filter.
    /// The baseline accepts every size.
    pub fn simulate_global(
        &self,
        window: &AnalysisWindow,
        slices: &[TrafficSlice],
        proposed: &SizeFilter,
    ) -> FilterSimulation {
        replay(None, window, slices, |_| true, &SizeFilter::Unset, proposed)
    }

    /// Replay all window traffic through one config's predicate, once with its
    /// current size filter and once with the proposed one.
    pub fn simulate_config(
        &self,
        config: &RoutingConfig,
        window: &AnalysisWindow,
        slices: &[TrafficSlice],
        proposed: &SizeFilter,
    ) -> FilterSimulation {
        replay(
            Some(config.id.clone()),
            window,
            slices,
            |s| config.matches_dimensions(&s.country, &s.platform, &s.environment),
            &config.sizes,
            proposed,
        )
    }
}

fn replay<F>(
    config_id: Option<String>,
    window: &AnalysisWindow,
    slices: &[TrafficSlice],
    dimensions_match: F,
    current: &SizeFilter,
    proposed: &SizeFilter,
) -> FilterSimulation
where
    F: Fn(&TrafficSlice) -> bool,
{
    let mut reached_by_size: BTreeMap<String, i64> = BTreeMap::new();
    for slice in slices.iter().filter(|s| dimensions_match(*s)) {
        *reached_by_size.entry(canonical_label(&slice.size)).or_insert(0) += slice.measures.reached_queries;
    }

    let mut per_size: Vec<SizeDiff> = reached_by_size
        .into_iter()
        .map(|(size, reached)| {
            let currently_accepted = current.accepts(&size);
            let proposed_accepted = proposed.accepts(&size);
            let change = match (currently_accepted, proposed_accepted) {
                (true, true) => SizeChange::Retained,
                (true, false) => SizeChange::Lost,
                (false, true) => SizeChange::Gained,
                (false, false) => SizeChange::Unmatched,
            };
            SizeDiff {
                size,
                reached,
                currently_accepted,
                proposed_accepted,
                change,
            }
        })
        .collect();
    per_size.sort_by(|a, b| b.reached.cmp(&a.reached).then_with(|| a.size.cmp(&b.size)));

    let sum = |change: SizeChange| -> i64 {
        per_size
            .iter()
            .filter(|d| d.change == change)
            .map(|d| d.reached)
            .sum()
    };
    let retained_reached = sum(SizeChange::Retained);
    let lost_reached = sum(SizeChange::Lost);
    let gained_reached = sum(SizeChange::Gained);

    FilterSimulation {
        config_id,
        window_start: window.start(),
        window_end: window.end(),
        current_sizes: current.sizes(),
        proposed_sizes: proposed.sizes(),
        narrows_from_all: current.is_unset() && !proposed.is_unset(),
        baseline_reached: retained_reached + lost_reached,
        retained_reached,
        lost_reached,
        gained_reached,
        insufficient_data: per_size.is_empty(),
        per_size,
    }
}
