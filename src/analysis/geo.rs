//! Geographic breakdown: per-country CTR and cost tiers over the window
//!
//! Countries are compared against the window-wide averages:
//! - EXCLUDE: CTR well below average with meaningful spend
//! - MONITOR: CTR or CPM well below average
//! - EXPAND: CTR well above average
//! - OK: everything else
//!
//! Rows with an UNKNOWN country are reported as unattributed, never tiered.

use super::window::AnalysisWindow;
use crate::config::GeoThresholds;
use crate::store::types::{GroupedMeasures, Measures, UNKNOWN};
use chrono::NaiveDate;
use serde::Serialize;

/// Export country names seen in place of ISO codes.
const COUNTRY_NAMES: &[(&str, &str)] = &[
    ("UNITED STATES", "US"),
    ("UNITED STATES OF AMERICA", "US"),
    ("USA", "US"),
    ("INDIA", "IN"),
    ("INDONESIA", "ID"),
    ("CANADA", "CA"),
    ("PHILIPPINES", "PH"),
    ("MALAYSIA", "MY"),
    ("BRAZIL", "BR"),
    ("VIETNAM", "VN"),
    ("VIET NAM", "VN"),
    ("THAILAND", "TH"),
    ("JAPAN", "JP"),
    ("MEXICO", "MX"),
    ("SOUTH KOREA", "KR"),
    ("KOREA, REPUBLIC OF", "KR"),
    ("AUSTRALIA", "AU"),
    ("SAUDI ARABIA", "SA"),
    ("PERU", "PE"),
    ("UNITED KINGDOM", "GB"),
    ("GREAT BRITAIN", "GB"),
    ("UK", "GB"),
    ("GERMANY", "DE"),
    ("FRANCE", "FR"),
    ("SPAIN", "ES"),
    ("ITALY", "IT"),
    ("NETHERLANDS", "NL"),
    ("SINGAPORE", "SG"),
    ("HONG KONG", "HK"),
    ("TAIWAN", "TW"),
    ("CHINA", "CN"),
    ("TURKEY", "TR"),
    ("PAKISTAN", "PK"),
    ("BANGLADESH", "BD"),
    ("NIGERIA", "NG"),
    ("EGYPT", "EG"),
    ("SOUTH AFRICA", "ZA"),
    ("ARGENTINA", "AR"),
    ("COLOMBIA", "CO"),
    ("CHILE", "CL"),
    ("POLAND", "PL"),
    ("RUSSIA", "RU"),
    ("RUSSIAN FEDERATION", "RU"),
    ("UNITED ARAB EMIRATES", "AE"),
];

/// Canonical country key: trimmed, uppercased, known names mapped to ISO codes.
///
/// Unrecognized names are kept whole; truncating them would merge distinct
/// countries under one key.
pub fn canonical_country(raw: &str) -> String {
    let upper = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
    COUNTRY_NAMES
        .iter()
        .find(|(name, _)| *name == upper)
        .map(|(_, code)| code.to_string())
        .unwrap_or(upper)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoTier {
    Exclude,
    Monitor,
    Ok,
    Expand,
}

impl GeoTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoTier::Exclude => "exclude",
            GeoTier::Monitor => "monitor",
            GeoTier::Ok => "ok",
            GeoTier::Expand => "expand",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoStats {
    pub country: String,
    pub measures: Measures,
    pub ctr: Option<f64>,
    /// Spend micros per thousand impressions
    pub cpm_micros: Option<f64>,
    /// CTR over the window average; `None` when either is undefined
    pub ctr_ratio: Option<f64>,
    pub cpm_ratio: Option<f64>,
    pub tier: GeoTier,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeoReport {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub average_ctr: Option<f64>,
    pub average_cpm_micros: Option<f64>,
    pub total_spend_micros: i64,
    /// Spend in countries tiered EXCLUDE
    pub wasted_spend_micros: i64,
    /// wasted / total spend, 0 without spend
    pub waste_pct: f64,
    /// Spend descending, then impressions descending
    pub geos: Vec<GeoStats>,
    /// Countries tiered OK or EXPAND, for a pretargeting geo INCLUDE list
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Countries under the impressions floor, left out of the tiers
    pub below_floor: usize,
    pub unattributed: Measures,
    pub insufficient_data: bool,
}

impl GeoReport {
    pub fn geo(&self, country: &str) -> Option<&GeoStats> {
        let key = canonical_country(country);
        self.geos.iter().find(|g| g.country == key)
    }
}

pub struct GeoAnalyzer {
    thresholds: GeoThresholds,
}

impl GeoAnalyzer {
    pub fn new(thresholds: GeoThresholds) -> Self {
        Self { thresholds }
    }

    /// `by_country` rows are grouped on the country dimension alone.
    pub fn analyze(&self, window: &AnalysisWindow, by_country: &[GroupedMeasures]) -> GeoReport {
        let mut unattributed = Measures::default();
        let mut below_floor = 0;
        let mut eligible: Vec<(String, Measures)> = Vec::new();

        for group in by_country {
            let Some(country) = group.values.first() else {
                continue;
            };
            if country == UNKNOWN {
                unattributed += group.measures;
            } else if group.measures.impressions < self.thresholds.min_impressions {
                below_floor += 1;
            } else {
                eligible.push((country.clone(), group.measures));
            }
        }

        let totals: Measures = eligible.iter().map(|(_, m)| *m).sum();
        let average_ctr = totals.ctr().filter(|c| *c > 0.0);
        let average_cpm_micros = cpm_micros(&totals).filter(|c| *c > 0.0);

        let mut wasted_spend_micros: i64 = 0;
        let mut geos: Vec<GeoStats> = eligible
            .into_iter()
            .map(|(country, measures)| {
                let ctr = measures.ctr();
                let cpm = cpm_micros(&measures);
                let ctr_ratio = ratio(ctr, average_ctr);
                let cpm_ratio = ratio(cpm, average_cpm_micros);
                let tier = self.tier(ctr_ratio, cpm_ratio, measures.spend_micros);
                if tier == GeoTier::Exclude {
                    wasted_spend_micros = wasted_spend_micros.saturating_add(measures.spend_micros);
                }
                GeoStats {
                    country,
                    measures,
                    ctr,
                    cpm_micros: cpm,
                    ctr_ratio,
                    cpm_ratio,
                    tier,
                }
            })
            .collect();

        geos.sort_by(|a, b| {
            b.measures
                .spend_micros
                .cmp(&a.measures.spend_micros)
                .then_with(|| b.measures.impressions.cmp(&a.measures.impressions))
                .then_with(|| a.country.cmp(&b.country))
        });

        let mut include: Vec<String> = geos
            .iter()
            .filter(|g| matches!(g.tier, GeoTier::Ok | GeoTier::Expand))
            .map(|g| g.country.clone())
            .collect();
        include.sort();
        let mut exclude: Vec<String> = geos
            .iter()
            .filter(|g| g.tier == GeoTier::Exclude)
            .map(|g| g.country.clone())
            .collect();
        exclude.sort();

        let waste_pct = if totals.spend_micros > 0 {
            wasted_spend_micros as f64 / totals.spend_micros as f64
        } else {
            0.0
        };

        GeoReport {
            window_start: window.start(),
            window_end: window.end(),
            average_ctr,
            average_cpm_micros,
            total_spend_micros: totals.spend_micros,
            wasted_spend_micros,
            waste_pct,
            insufficient_data: geos.is_empty(),
            geos,
            include,
            exclude,
            below_floor,
            unattributed,
        }
    }

    /// Undefined ratios (no clicks or no spend anywhere) are neutral.
    fn tier(&self, ctr_ratio: Option<f64>, cpm_ratio: Option<f64>, spend_micros: i64) -> GeoTier {
        let t = &self.thresholds;
        let low_ctr = ctr_ratio.map(|r| r < t.low_ctr_ratio).unwrap_or(false);
        let low_cpm = cpm_ratio.map(|r| r < t.low_cpm_ratio).unwrap_or(false);

        if low_ctr && spend_micros > t.exclude_min_spend_micros {
            GeoTier::Exclude
        } else if low_ctr || low_cpm {
            GeoTier::Monitor
        } else if ctr_ratio.map(|r| r > t.expand_ctr_ratio).unwrap_or(false) {
            GeoTier::Expand
        } else {
            GeoTier::Ok
        }
    }
}

fn cpm_micros(m: &Measures) -> Option<f64> {
    if m.impressions > 0 {
        Some(m.spend_micros as f64 * 1_000.0 / m.impressions as f64)
    } else {
        None
    }
}

fn ratio(value: Option<f64>, average: Option<f64>) -> Option<f64> {
    match (value, average) {
        (Some(v), Some(a)) if a > 0.0 => Some(v / a),
        _ => None,
    }
}
