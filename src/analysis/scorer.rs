//! Confidence scoring for anomaly signals

use super::signals::Confidence;
use crate::config::SignalThresholds;

/// Maps (occurrence count, magnitude ratio) to a confidence level.
///
/// Occurrences set the base level; a magnitude at or above the escalation
/// multiple lifts it one level once the pattern has repeated. A single
/// occurrence stays low whatever its size. Non-decreasing in both inputs.
pub struct ConfidenceScorer {
    medium_occurrences: u32,
    high_occurrences: u32,
    escalation_multiple: f64,
}

impl ConfidenceScorer {
    pub fn new(thresholds: &SignalThresholds) -> Self {
        Self {
            medium_occurrences: thresholds.medium_occurrences,
            high_occurrences: thresholds.high_occurrences,
            escalation_multiple: thresholds.escalation_multiple,
        }
    }

    pub fn from_occurrences(&self, occurrences: u32) -> Confidence {
        if occurrences >= self.high_occurrences {
            Confidence::High
        } else if occurrences >= self.medium_occurrences {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    pub fn score(&self, occurrences: u32, magnitude: f64) -> Confidence {
        let base = self.from_occurrences(occurrences);
        // NaN compares false and never escalates
        if occurrences >= self.medium_occurrences && magnitude >= self.escalation_multiple {
            base.escalate()
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> ConfidenceScorer {
        ConfidenceScorer::new(&SignalThresholds::default())
    }

    #[test]
    fn test_occurrence_ladder() {
        let s = scorer();
        assert_eq!(s.score(1, 1.1), Confidence::Low);
        assert_eq!(s.score(2, 1.1), Confidence::Medium);
        assert_eq!(s.score(3, 1.1), Confidence::Medium);
        assert_eq!(s.score(4, 1.1), Confidence::High);
    }

    #[test]
    fn test_magnitude_escalates_one_level() {
        let s = scorer();
        assert_eq!(s.score(2, 2.0), Confidence::High);
        assert_eq!(s.score(3, 5.0), Confidence::High);
        assert_eq!(s.score(4, 50.0), Confidence::High);
        assert_eq!(s.score(2, f64::INFINITY), Confidence::High);
        assert_eq!(s.score(2, f64::NAN), Confidence::Medium);
    }

    #[test]
    fn test_single_occurrence_never_escalates() {
        let s = scorer();
        assert_eq!(s.score(1, 2.0), Confidence::Low);
        assert_eq!(s.score(1, 1_500.0), Confidence::Low);
        assert_eq!(s.score(1, f64::INFINITY), Confidence::Low);
        assert_eq!(s.score(0, 10.0), Confidence::Low);
    }

    #[test]
    fn test_monotonic_in_occurrences_and_magnitude() {
        let s = scorer();
        let magnitudes = [0.0, 0.5, 1.0, 1.99, 2.0, 3.0, 100.0];
        for m in magnitudes {
            let mut previous = Confidence::Low;
            for n in 0..=10 {
                let c = s.score(n, m);
                assert!(c >= previous, "occurrences {} magnitude {}", n, m);
                previous = c;
            }
        }
        for n in 0..=10 {
            let mut previous = Confidence::Low;
            for m in magnitudes {
                let c = s.score(n, m);
                assert!(c >= previous, "occurrences {} magnitude {}", n, m);
                previous = c;
            }
        }
    }
}
