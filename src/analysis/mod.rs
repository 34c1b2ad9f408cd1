//! Analysis - coverage matching, geo tiers, routing constraints and anomaly signals
//!
//! Every function here reads aggregates already pulled from the store and
//! returns a report object. Nothing in this module writes.

pub mod config_perf;
pub mod constraints;
pub mod coverage;
pub mod detector;
pub mod geo;
pub mod routing;
pub mod scorer;
pub mod signals;
pub mod sizes;
pub mod window;

pub use config_perf::{config_performance, ConfigIssue, ConfigPerformance, ConfigPerformanceReport};
pub use constraints::{
    slices_from_groups, CapacityReport, ConstraintEvaluator, EndpointCapacity, FilterSimulation, SizeChange,
    SizeDiff, TrafficSlice, SLICE_DIMENSIONS,
};
pub use coverage::{CoverageMatcher, CoverageRecord, CoverageReport, Priority, Recommendation};
pub use detector::{Detection, SignalDetector};
pub use geo::{canonical_country, GeoAnalyzer, GeoReport, GeoStats, GeoTier};
pub use routing::{ConfigState, Endpoint, RoutingConfig, RoutingSet, SizeFilter};
pub use scorer::ConfidenceScorer;
pub use signals::{AnomalySignal, Confidence, SignalFinding, SignalKey, SignalStatus, SignalType};
pub use sizes::CreativeSize;
pub use window::{resolve_anchor, AnalysisWindow};
