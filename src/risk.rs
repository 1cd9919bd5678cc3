use chrono::{DateTime, Duration, Utc};

use crate::labels::{RiskTier, SentimentLabel};
use crate::models::{Alert, ClassificationResult};

/// Suicidal classifications must exceed this confidence to raise an alert.
pub const ALERT_CONFIDENCE_THRESHOLD: f64 = 0.70;

pub const DEFAULT_ALERT_DAYS_BACK: i64 = 7;

#[derive(Debug, Clone, PartialEq)]
pub struct Escalation {
    pub highest_risk_tier: RiskTier,
    pub alerts: Vec<Alert>,
    pub high_risk_alert_count: u64,
}

pub fn item_risk_tier(result: &ClassificationResult) -> RiskTier {
    result.label.risk_tier()
}

pub fn is_alert(result: &ClassificationResult) -> bool {
    result.label == SentimentLabel::Suicidal && result.confidence > ALERT_CONFIDENCE_THRESHOLD
}

#[derive(Debug, Clone, Default)]
pub struct RiskTally {
    highest: RiskTier,
    alerts: Vec<Alert>,
}

impl RiskTally {
    pub fn push(&mut self, result: &ClassificationResult) {
        self.highest = self.highest.max(item_risk_tier(result));

        if is_alert(result) {
            tracing::warn!(
                confidence = result.confidence,
                "high-risk suicidal ideation detected"
            );
            self.alerts.push(Alert {
                text: result.text.clone(),
                confidence: result.confidence,
            });
        }
    }

    pub fn merge(&mut self, other: RiskTally) {
        self.highest = self.highest.max(other.highest);
        self.alerts.extend(other.alerts);
    }

    pub fn finish(self) -> Escalation {
        Escalation {
            highest_risk_tier: self.highest,
            high_risk_alert_count: self.alerts.len() as u64,
            alerts: self.alerts,
        }
    }
}

pub fn escalate(results: &[ClassificationResult]) -> Escalation {
    let mut tally = RiskTally::default();
    for result in results {
        tally.push(result);
    }
    tally.finish()
}

/// Start of the trailing alert window. Windows shorter than a day are widened to one day.
pub fn alert_window_start(days_back: i64, now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(days_back.max(1))
}
