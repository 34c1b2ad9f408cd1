//! Plain-text renderings of engine reports for the terminal

use crate::analysis::config_perf::ConfigPerformanceReport;
use crate::analysis::constraints::{CapacityReport, FilterSimulation, SizeChange};
use crate::analysis::coverage::CoverageReport;
use crate::analysis::geo::GeoReport;
use crate::analysis::signals::AnomalySignal;
use crate::engine::SignalReport;
use crate::ingest_core::batch::{ImportBatch, IngestReport};
use crate::ingest_core::coerce::format_micros;
use chrono::{DateTime, Utc};
use std::fmt::Write;

const RULE: &str = "═══════════════════════════════════════════════════════════════════════";

fn pct(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

fn timestamp(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

pub fn render_ingest(report: &IngestReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "📥 {} → batch {}", report.source_name, report.batch_id);
    let _ = writeln!(
        out,
        "   rows: {}   aggregates: {}   warnings: {}   anomaly candidates: {}",
        report.imported_count,
        report.aggregate_count,
        report.warnings.len(),
        report.anomaly_candidates.len()
    );
    for warning in report.warnings.iter().take(20) {
        let _ = writeln!(out, "   ⚠️  {}", warning);
    }
    if report.warnings.len() > 20 {
        let _ = writeln!(out, "   … {} more warnings", report.warnings.len() - 20);
    }
    for candidate in report.anomaly_candidates.iter().take(10) {
        let _ = writeln!(
            out,
            "   🔎 row {}: {} (app {}, {} impressions, {} clicks, spend {})",
            candidate.row,
            candidate.kind.as_str(),
            candidate.app_id,
            candidate.impressions,
            candidate.clicks,
            format_micros(candidate.spend_micros)
        );
    }
    out
}

pub fn render_coverage(report: &CoverageReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(
        out,
        "🎯 SIZE COVERAGE  {} .. {}  ({} days, {} with traffic)",
        report.window_start, report.window_end, report.window_days, report.observed_days
    );
    let _ = writeln!(out, "{}", RULE);
    if report.insufficient_data {
        let _ = writeln!(out, "⚠️  Insufficient data in this window; figures are provisional");
    }
    let _ = writeln!(
        out,
        "Match rate {}  |  reached {}  |  servable {}  |  waste {}",
        pct(report.match_rate),
        report.total_reached,
        report.servable_reached,
        report.total_waste
    );
    let _ = writeln!(
        out,
        "Sizes: {} in traffic, {} servable, {} unservable, {} in inventory",
        report.sizes_in_traffic, report.servable_sizes, report.unservable_sizes, report.sizes_in_inventory
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<12} {:>12} {:>12} {:>8} {:>6} {:<22} {:<8}",
        "SIZE", "REACHED", "IMPRESSIONS", "EFF", "INV", "RECOMMENDATION", "PRIORITY"
    );
    for r in &report.records {
        let _ = writeln!(
            out,
            "{:<12} {:>12} {:>12} {:>8} {:>6} {:<22} {:<8}",
            r.size,
            r.reached,
            r.impressions,
            pct(r.efficiency),
            r.creative_count,
            r.recommendation.as_str(),
            r.priority.map(|p| p.as_str()).unwrap_or("-")
        );
    }
    if !report.top_opportunities.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "💡 Top opportunities");
        for r in &report.top_opportunities {
            let near = r
                .near_miss
                .as_deref()
                .map(|n| format!(" (near {})", n))
                .unwrap_or_default();
            let _ = writeln!(out, "   {:<12} waste {:>10}  {}{}", r.size, r.waste, r.recommendation.as_str(), near);
        }
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "✅ Include list: {}", report.include_list.join(", "));
    out
}

pub fn render_simulation(sim: &FilterSimulation) -> String {
    let mut out = String::new();
    let scope = sim.config_id.as_deref().unwrap_or("all traffic");
    let _ = writeln!(out, "🧪 Size filter what-if for {} ({} .. {})", scope, sim.window_start, sim.window_end);
    let describe = |sizes: &[String]| {
        if sizes.is_empty() {
            "all sizes".to_string()
        } else {
            sizes.join(", ")
        }
    };
    let _ = writeln!(out, "   current:  {}", describe(&sim.current_sizes));
    let _ = writeln!(out, "   proposed: {}", describe(&sim.proposed_sizes));
    if sim.narrows_from_all {
        let _ = writeln!(out, "   ⚠️  Proposal narrows an accept-all filter to a list");
    }
    if sim.insufficient_data {
        let _ = writeln!(out, "   ⚠️  No traffic in window");
    }
    let _ = writeln!(
        out,
        "   baseline {}  retained {} ({})  lost {}  gained {}",
        sim.baseline_reached,
        sim.retained_reached,
        pct(sim.retained_fraction()),
        sim.lost_reached,
        sim.gained_reached
    );
    for diff in sim.per_size.iter().filter(|d| matches!(d.change, SizeChange::Lost | SizeChange::Gained)) {
        let _ = writeln!(out, "   {:<12} {:>12}  {}", diff.size, diff.reached, diff.change.as_str());
    }
    out
}

pub fn render_capacity(report: &CapacityReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "⚖️  Endpoint capacity ({} .. {})", report.window_start, report.window_end);
    for e in &report.endpoints {
        let flag = if e.oversubscribed { "🔴 OVERSUBSCRIBED" } else { "🟢 ok" };
        let _ = writeln!(
            out,
            "   {:<16} allocated {:>8} / max {:>8}  headroom {:>8}  observed {:>10.2} qps ({})  {}",
            e.endpoint_id,
            e.allocated_qps,
            e.max_qps,
            e.headroom_qps,
            e.observed_qps,
            pct(e.observed_utilization),
            flag
        );
        if !e.suspended_configs.is_empty() {
            let _ = writeln!(out, "   {:<16} suspended: {}", "", e.suspended_configs.join(", "));
        }
    }
    out
}

pub fn render_config_performance(report: &ConfigPerformanceReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "📊 Routing configs ({} .. {})", report.window_start, report.window_end);
    let _ = writeln!(
        out,
        "   {:<16} {:<24} {:>12} {:>12} {:>8} {:>8}  ISSUES",
        "CONFIG", "NAME", "REACHED", "IMPRESSIONS", "EFF", "CTR"
    );
    for c in &report.configs {
        let issues: Vec<&str> = c.issues.iter().map(|i| i.label()).collect();
        let _ = writeln!(
            out,
            "   {:<16} {:<24} {:>12} {:>12} {:>8} {:>8}  {}",
            c.config_id,
            c.name.as_deref().unwrap_or("-"),
            c.measures.reached_queries,
            c.measures.impressions,
            pct(c.efficiency),
            c.ctr.map(pct).unwrap_or_else(|| "-".to_string()),
            issues.join(", ")
        );
    }
    out
}

pub fn render_geo(report: &GeoReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "🌍 Geo performance ({} .. {})", report.window_start, report.window_end);
    if report.insufficient_data {
        let _ = writeln!(out, "   ⚠️  No traffic in window");
        return out;
    }
    let _ = writeln!(
        out,
        "   average CTR {}  |  spend {}  |  wasted {} ({})",
        report.average_ctr.map(pct).unwrap_or_else(|| "-".to_string()),
        format_micros(report.total_spend_micros),
        format_micros(report.wasted_spend_micros),
        pct(report.waste_pct)
    );
    let _ = writeln!(
        out,
        "   {:<8} {:>12} {:>8} {:>12} {:>8}  TIER",
        "COUNTRY", "IMPRESSIONS", "CTR", "SPEND", "CTR/AVG"
    );
    for g in &report.geos {
        let _ = writeln!(
            out,
            "   {:<8} {:>12} {:>8} {:>12} {:>8}  {}",
            g.country,
            g.measures.impressions,
            g.ctr.map(pct).unwrap_or_else(|| "-".to_string()),
            format_micros(g.measures.spend_micros),
            g.ctr_ratio.map(|r| format!("{:.2}x", r)).unwrap_or_else(|| "-".to_string()),
            g.tier.as_str()
        );
    }
    if report.below_floor > 0 || !report.unattributed.is_zero() {
        let _ = writeln!(
            out,
            "   {} countries under the floor, {} impressions without a country",
            report.below_floor, report.unattributed.impressions
        );
    }
    let _ = writeln!(out, "   ✅ Include: {}", report.include.join(", "));
    let _ = writeln!(out, "   🚫 Exclude: {}", report.exclude.join(", "));
    out
}

pub fn render_signals(signals: &[AnomalySignal]) -> String {
    let mut out = String::new();
    if signals.is_empty() {
        let _ = writeln!(out, "   (no signals)");
        return out;
    }
    for s in signals {
        let _ = writeln!(
            out,
            "   #{:<5} {:<8} {:<26} {:<6} {:<32} {} .. {}  ({} days)",
            s.id,
            s.status.as_str(),
            s.signal_type.as_str(),
            s.confidence.as_str(),
            s.key,
            s.window_start,
            s.window_end,
            s.days_observed
        );
    }
    out
}

pub fn render_signal_report(report: &SignalReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "🚨 Signals {} .. {}: {} new, {} refreshed, {} keys evaluated, {} all-UNKNOWN keys skipped",
        report.window_start,
        report.window_end,
        report.new_signals,
        report.refreshed_signals,
        report.keys_evaluated,
        report.skipped_unknown_keys
    );
    if let Some(baseline) = report.baseline_ctr {
        let _ = writeln!(out, "   baseline CTR {}", pct(baseline));
    }
    if report.insufficient_data {
        let _ = writeln!(out, "   ⚠️  No traffic in window");
    }
    out.push_str(&render_signals(&report.signals));
    out
}

pub fn render_history(batches: &[ImportBatch]) -> String {
    let mut out = String::new();
    for b in batches {
        let _ = writeln!(
            out,
            "   #{:<5} {}  {:<32} rows {:>8}  aggregates {:>8}  warnings {:>5}  {}",
            b.id,
            timestamp(b.imported_at),
            b.source_name,
            b.row_count,
            b.aggregate_count,
            b.warning_count,
            &b.content_hash[..b.content_hash.len().min(12)]
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::signals::{Confidence, SignalStatus, SignalType};
    use chrono::NaiveDate;

    #[test]
    fn test_render_signals() {
        let day = NaiveDate::from_ymd_opt(2025, 11, 7).unwrap();
        let signal = AnomalySignal {
            id: 3,
            key: "app=com.x".to_string(),
            signal_type: SignalType::ExtremeCtr,
            confidence: Confidence::High,
            evidence: serde_json::json!({}),
            days_observed: 4,
            window_start: day,
            window_end: day,
            status: SignalStatus::Pending,
            created_at: 0,
            updated_at: 0,
        };
        let text = render_signals(&[signal]);
        assert!(text.contains("extreme_ctr"));
        assert!(text.contains("app=com.x"));
        assert!(text.contains("high"));
        assert!(render_signals(&[]).contains("no signals"));
    }

    #[test]
    fn test_render_geo_lists_tiers() {
        use crate::analysis::geo::GeoAnalyzer;
        use crate::analysis::window::AnalysisWindow;
        use crate::config::GeoThresholds;
        use crate::store::types::{GroupedMeasures, Measures};

        let day = NaiveDate::from_ymd_opt(2025, 11, 7).unwrap();
        let window = AnalysisWindow::trailing(day, 7);
        let group = |country: &str, impressions, clicks, spend_micros| GroupedMeasures {
            values: vec![country.to_string()],
            measures: Measures { impressions, clicks, spend_micros, ..Default::default() },
        };
        let rows = vec![group("US", 50_000, 1_000, 200_000_000), group("IN", 30_000, 60, 30_000_000)];
        let report = GeoAnalyzer::new(GeoThresholds::default()).analyze(&window, &rows);
        let text = render_geo(&report);
        assert!(text.contains("expand"));
        assert!(text.contains("Include: US"));
        assert!(text.contains("Exclude: IN"));
    }

    #[test]
    fn test_render_history_truncates_hash() {
        let batch = ImportBatch {
            id: 1,
            content_hash: "abcdef0123456789abcdef".to_string(),
            source_name: "export.csv".to_string(),
            row_count: 10,
            aggregate_count: 4,
            warning_count: 0,
            anomaly_count: 0,
            imported_at: 1_762_560_000,
        };
        let text = render_history(&[batch]);
        assert!(text.contains("abcdef012345\n"));
        assert!(!text.contains("abcdef0123456"));
        assert!(text.contains("2025-11-08 00:00:00"));
    }
}
