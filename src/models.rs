use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::labels::{RiskTier, SentimentLabel};

/// Label counts keyed in registry order. Always holds all five labels.
pub type Distribution = BTreeMap<SentimentLabel, u64>;

/// Raw item as emitted by the classifier adapter.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedItem {
    pub text: String,
    #[serde(alias = "label_index")]
    pub label_index: i64,
    pub confidence: f64,
}

/// A classified item with its label resolved against the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub text: String,
    pub label: SentimentLabel,
    pub confidence: f64,
}

impl ClassificationResult {
    pub fn new(text: impl Into<String>, label: SentimentLabel, confidence: f64) -> Result<Self> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(EngineError::InvalidConfidence(confidence));
        }

        Ok(Self {
            text: text.into(),
            label,
            confidence,
        })
    }
}

impl TryFrom<&ClassifiedItem> for ClassificationResult {
    type Error = EngineError;

    fn try_from(item: &ClassifiedItem) -> Result<Self> {
        let label = SentimentLabel::from_index(item.label_index)?;
        Self::new(item.text.clone(), label, item.confidence)
    }
}

/// A high-confidence suicidal-ideation detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub text: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub sentiment_distribution: Distribution,
    #[serde(with = "dominant_name")]
    pub dominant_sentiment: Option<SentimentLabel>,
    pub average_confidence: f64,
    pub min_confidence: f64,
    pub max_confidence: f64,
    pub highest_risk_level: RiskTier,
    pub high_risk_alerts: u64,
    pub total_responses: u64,
}

impl AggregateReport {
    pub fn count(&self, label: SentimentLabel) -> u64 {
        self.sentiment_distribution.get(&label).copied().unwrap_or(0)
    }

    pub fn dominant_name(&self) -> &'static str {
        self.dominant_sentiment
            .map(|label| label.name())
            .unwrap_or(UNKNOWN_LABEL)
    }
}

/// Live batch output: the report, the alerts behind its alert count, and the
/// ids of any responses persisted alongside it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAnalysis {
    pub aggregate_analysis: AggregateReport,
    pub alerts: Vec<Alert>,
    pub processed_count: u64,
    pub saved_response_ids: Vec<Uuid>,
}

/// Sentinel reported as the dominant label of an empty batch.
pub const UNKNOWN_LABEL: &str = "UNKNOWN";

mod dominant_name {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::UNKNOWN_LABEL;
    use crate::labels::SentimentLabel;

    pub fn serialize<S>(value: &Option<SentimentLabel>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value.map(|label| label.name()).unwrap_or(UNKNOWN_LABEL))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SentimentLabel>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        if name == UNKNOWN_LABEL {
            return Ok(None);
        }
        SentimentLabel::from_name(&name)
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}

/// A persisted response row as read back from the store.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub id: Uuid,
    pub session_id: Uuid,
    pub text: String,
    pub label: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl StoredResponse {
    pub fn to_result(&self) -> Result<ClassificationResult> {
        let label = SentimentLabel::from_name(&self.label)?;
        ClassificationResult::new(self.text.clone(), label, self.confidence)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub patient_id: Uuid,
    pub clinician_id: Uuid,
    pub title: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    #[serde(flatten)]
    pub session: SessionInfo,
    pub aggregate: AggregateReport,
}

/// Stored response together with the routing context a follow-up needs.
#[derive(Debug, Clone)]
pub struct AlertCandidate {
    pub response: StoredResponse,
    pub patient_id: Uuid,
    pub clinician_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertContext {
    pub response_id: Uuid,
    pub session_id: Uuid,
    pub patient_id: Uuid,
    pub clinician_id: Uuid,
    pub text: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_confidence_outside_unit_interval() {
        for bad in [-0.01, 1.01, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                ClassificationResult::new("text", SentimentLabel::Anger, bad),
                Err(EngineError::InvalidConfidence(_))
            ));
        }
        assert!(ClassificationResult::new("text", SentimentLabel::Anger, 0.0).is_ok());
        assert!(ClassificationResult::new("text", SentimentLabel::Anger, 1.0).is_ok());
    }

    #[test]
    fn resolves_classifier_item_by_index() {
        let item = ClassifiedItem {
            text: "I can't stop worrying".to_string(),
            label_index: 0,
            confidence: 0.8,
        };
        let result = ClassificationResult::try_from(&item).unwrap();
        assert_eq!(result.label, SentimentLabel::Anxiety);

        let bad = ClassifiedItem {
            label_index: 7,
            ..item
        };
        assert!(matches!(
            ClassificationResult::try_from(&bad),
            Err(EngineError::InvalidLabelIndex(7))
        ));
    }

    #[test]
    fn parses_classifier_item_json() {
        let item: ClassifiedItem =
            serde_json::from_str(r#"{"text":"no sleep","labelIndex":3,"confidence":0.61}"#)
                .unwrap();
        assert_eq!(item.label_index, 3);
        assert_eq!(item.confidence, 0.61);
    }

    #[test]
    fn stored_label_names_resolve_through_registry() {
        let stored = StoredResponse {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            text: "everything is pointless".to_string(),
            label: "HAPPY".to_string(),
            confidence: 0.5,
            created_at: Utc::now(),
        };
        assert!(matches!(
            stored.to_result(),
            Err(EngineError::UnknownLabelName(name)) if name == "HAPPY"
        ));
    }
}
