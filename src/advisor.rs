//! Optional productivity advice.
//!
//! Advisors are pluggable behind [`ProductivityAdvisor`]. Callers go through
//! [`advise`], which falls back to neutral output whenever the advisor is
//! unavailable or fails, so nothing else in the crate depends on one being
//! present.

use crate::error::Result;
use crate::models::{Kpis, StatRow};
use log::{debug, warn};

/// Score reported when no advisor can produce one.
pub const NEUTRAL_SCORE: f64 = 0.0;

pub trait ProductivityAdvisor {
    /// Short identifier shown next to the advice.
    fn name(&self) -> &str;

    /// Whether the advisor can be used right now.
    fn is_available(&self) -> bool;

    /// Productivity score for the range summarised by `kpis`.
    fn predict(&self, kpis: &Kpis) -> Result<f64>;

    /// Human-readable observations about the range.
    fn insights(&self, stats: &[StatRow], kpis: &Kpis) -> Result<Vec<String>>;
}

/// Always unavailable; used when nothing better is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeutralAdvisor;

impl ProductivityAdvisor for NeutralAdvisor {
    fn name(&self) -> &str {
        "neutral"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn predict(&self, _kpis: &Kpis) -> Result<f64> {
        Ok(NEUTRAL_SCORE)
    }

    fn insights(&self, _stats: &[StatRow], _kpis: &Kpis) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Advice {
    pub source: String,
    pub available: bool,
    pub score: f64,
    pub insights: Vec<String>,
}

impl Advice {
    fn neutral() -> Self {
        Advice {
            source: NeutralAdvisor.name().to_string(),
            available: false,
            score: NEUTRAL_SCORE,
            insights: Vec::new(),
        }
    }
}

/// Ask `advisor` for a score and insights, degrading to neutral output.
pub fn advise(advisor: &dyn ProductivityAdvisor, stats: &[StatRow], kpis: Option<&Kpis>) -> Advice {
    let kpis = match kpis {
        Some(kpis) => kpis,
        None => {
            debug!("No entries in range; neutral advice");
            return Advice::neutral();
        }
    };
    if !advisor.is_available() {
        debug!("Advisor {} unavailable; neutral advice", advisor.name());
        return Advice::neutral();
    }

    let score = match advisor.predict(kpis) {
        Ok(score) if score.is_finite() => score,
        Ok(score) => {
            warn!("Advisor {} returned a non-finite score {}", advisor.name(), score);
            NEUTRAL_SCORE
        }
        Err(e) => {
            warn!("Advisor {} failed to predict: {}", advisor.name(), e);
            NEUTRAL_SCORE
        }
    };
    let insights = advisor.insights(stats, kpis).unwrap_or_else(|e| {
        warn!("Advisor {} failed to produce insights: {}", advisor.name(), e);
        Vec::new()
    });

    Advice {
        source: advisor.name().to_string(),
        available: true,
        score,
        insights,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;

    fn kpis() -> Kpis {
        Kpis {
            total_hours: 4.0,
            total_target_hours: 5.0,
            planned_vs_actual: Some(80.0),
            focus_ratio: Some(50.0),
            category_hours: vec![("Math".into(), 4.0)],
            switches: 0,
            switches_per_day: Some(0.0),
            overtime_hours: 0.0,
            completion_rate: Some(100.0),
            avg_entry_hours: Some(4.0),
            productivity_score: 1.5,
            active_days: 1,
            entry_count: 1,
        }
    }

    struct FlakyAdvisor;

    impl ProductivityAdvisor for FlakyAdvisor {
        fn name(&self) -> &str {
            "flaky"
        }
        fn is_available(&self) -> bool {
            true
        }
        fn predict(&self, kpis: &Kpis) -> Result<f64> {
            Ok(kpis.productivity_score * 2.0)
        }
        fn insights(&self, _stats: &[StatRow], _kpis: &Kpis) -> Result<Vec<String>> {
            Err(TrackerError::other("model missing"))
        }
    }

    #[test]
    fn test_neutral_advisor_output() {
        let advice = advise(&NeutralAdvisor, &[], Some(&kpis()));
        assert_eq!(advice.score, NEUTRAL_SCORE);
        assert!(advice.insights.is_empty());
        assert!(!advice.available);
    }

    #[test]
    fn test_available_advisor_failures_degrade() {
        let advice = advise(&FlakyAdvisor, &[], Some(&kpis()));
        assert!(advice.available);
        assert_eq!(advice.score, 3.0);
        assert!(advice.insights.is_empty());
        assert_eq!(advice.source, "flaky");
    }

    #[test]
    fn test_empty_range_is_neutral() {
        let advice = advise(&FlakyAdvisor, &[], None);
        assert_eq!(advice, Advice::neutral());
    }
}
