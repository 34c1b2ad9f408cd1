//! Advisory anomaly signals and their review state machine

use crate::error::{EngineError, Result};
use crate::store::types::Dimension;
use chrono::NaiveDate;
use serde::Serialize;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    ClicksExceedImpressions,
    ExtremeCtr,
    ZeroEngagementAtVolume,
    SpendWithoutDelivery,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::ClicksExceedImpressions => "clicks_exceed_impressions",
            SignalType::ExtremeCtr => "extreme_ctr",
            SignalType::ZeroEngagementAtVolume => "zero_engagement_at_volume",
            SignalType::SpendWithoutDelivery => "spend_without_delivery",
        }
    }

}

impl FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "clicks_exceed_impressions" => Ok(SignalType::ClicksExceedImpressions),
            "extreme_ctr" => Ok(SignalType::ExtremeCtr),
            "zero_engagement_at_volume" => Ok(SignalType::ZeroEngagementAtVolume),
            "spend_without_delivery" => Ok(SignalType::SpendWithoutDelivery),
            other => Err(format!("unknown signal type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }

    /// One level up, saturating at high.
    pub fn escalate(self) -> Self {
        match self {
            Confidence::Low => Confidence::Medium,
            Confidence::Medium | Confidence::High => Confidence::High,
        }
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(Confidence::Low),
            "medium" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            other => Err(format!("unknown confidence '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Pending,
    Reviewed,
    Cleared,
    Blocked,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Pending => "pending",
            SignalStatus::Reviewed => "reviewed",
            SignalStatus::Cleared => "cleared",
            SignalStatus::Blocked => "blocked",
        }
    }

    /// Still awaiting a final disposition.
    pub fn is_open(&self) -> bool {
        matches!(self, SignalStatus::Pending | SignalStatus::Reviewed)
    }

    /// pending → reviewed → {cleared, blocked}
    pub fn can_transition_to(&self, next: SignalStatus) -> bool {
        matches!(
            (self, next),
            (SignalStatus::Pending, SignalStatus::Reviewed)
                | (SignalStatus::Reviewed, SignalStatus::Cleared)
                | (SignalStatus::Reviewed, SignalStatus::Blocked)
        )
    }

    pub fn check_transition(&self, id: i64, next: SignalStatus) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition {
                id,
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }
}

impl FromStr for SignalStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SignalStatus::Pending),
            "reviewed" => Ok(SignalStatus::Reviewed),
            "cleared" => Ok(SignalStatus::Cleared),
            "blocked" => Ok(SignalStatus::Blocked),
            other => Err(format!("unknown signal status '{}'", other)),
        }
    }
}

/// Dimension values identifying what a signal is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SignalKey {
    pub parts: Vec<(Dimension, String)>,
}

impl SignalKey {
    pub fn new(parts: Vec<(Dimension, String)>) -> Self {
        Self { parts }
    }

    /// Stable text form, e.g. `app=com.example|country=US`.
    pub fn render(&self) -> String {
        self.parts
            .iter()
            .map(|(d, v)| format!("{}={}", d.as_str(), v))
            .collect::<Vec<_>>()
            .join("|")
    }

    pub fn value(&self, dimension: Dimension) -> Option<&str> {
        self.parts
            .iter()
            .find(|(d, _)| *d == dimension)
            .map(|(_, v)| v.as_str())
    }
}

/// A detector finding before it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalFinding {
    pub key: SignalKey,
    pub signal_type: SignalType,
    pub confidence: Confidence,
    pub evidence: serde_json::Value,
    pub days_observed: u32,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalySignal {
    pub id: i64,
    pub key: String,
    pub signal_type: SignalType,
    pub confidence: Confidence,
    pub evidence: serde_json::Value,
    pub days_observed: u32,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub status: SignalStatus,
    pub created_at: i64,
    pub updated_at: i64,
}
