use std::thread;

use crate::error::Result;
use crate::labels::SentimentLabel;
use crate::models::{
    AggregateReport, Alert, BatchAnalysis, ClassificationResult, ClassifiedItem, Distribution,
};
use crate::risk::RiskTally;

/// Confidence is summed as integer multiples of 1e-12 so the total is independent of
/// the order in which items or shards are combined.
const CONFIDENCE_UNITS: u128 = 1_000_000_000_000;

fn to_units(confidence: f64) -> u128 {
    (confidence * CONFIDENCE_UNITS as f64).round() as u128
}

/// Half-up rounding of `units / count` to three decimals, done in integers.
fn round_units(units: u128, count: u128) -> f64 {
    let denominator = 2 * count * CONFIDENCE_UNITS;
    let milli = (units * 2000 + count * CONFIDENCE_UNITS) / denominator;
    milli as f64 / 1000.0
}

/// Round a confidence half-up to three decimals on the same grid as the average.
pub fn round3(value: f64) -> f64 {
    round_units(to_units(value), 1)
}

/// Mergeable partial aggregate over a shard of results.
#[derive(Debug, Clone, Default)]
pub struct BatchTally {
    counts: [u64; 5],
    total: u64,
    confidence_units: u128,
    min: Option<f64>,
    max: Option<f64>,
    risk: RiskTally,
}

impl BatchTally {
    pub fn push(&mut self, result: &ClassificationResult) {
        self.counts[result.label.index() as usize] += 1;
        self.total += 1;
        self.confidence_units += to_units(result.confidence);
        self.min = Some(self.min.map_or(result.confidence, |m| m.min(result.confidence)));
        self.max = Some(self.max.map_or(result.confidence, |m| m.max(result.confidence)));
        self.risk.push(result);
    }

    pub fn merge(&mut self, other: BatchTally) {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts) {
            *mine += theirs;
        }
        self.total += other.total;
        self.confidence_units += other.confidence_units;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.risk.merge(other.risk);
    }

    pub fn finish(self) -> AggregateReport {
        self.finish_with_alerts().0
    }

    pub fn finish_with_alerts(self) -> (AggregateReport, Vec<Alert>) {
        let distribution: Distribution = SentimentLabel::ALL
            .into_iter()
            .map(|label| (label, self.counts[label.index() as usize]))
            .collect();

        // Strictly-greater comparison in index order keeps the lowest index on ties.
        let mut dominant: Option<(SentimentLabel, u64)> = None;
        for (label, count) in distribution.iter() {
            if *count > dominant.map_or(0, |(_, best)| best) {
                dominant = Some((*label, *count));
            }
        }

        let average_confidence = if self.total == 0 {
            0.0
        } else {
            round_units(self.confidence_units, self.total as u128)
        };

        let escalation = self.risk.finish();

        let report = AggregateReport {
            sentiment_distribution: distribution,
            dominant_sentiment: dominant.map(|(label, _)| label),
            average_confidence,
            min_confidence: self.min.map_or(0.0, round3),
            max_confidence: self.max.map_or(0.0, round3),
            highest_risk_level: escalation.highest_risk_tier,
            high_risk_alerts: escalation.high_risk_alert_count,
            total_responses: self.total,
        };
        (report, escalation.alerts)
    }
}

pub fn aggregate(results: &[ClassificationResult]) -> AggregateReport {
    let mut tally = BatchTally::default();
    for result in results {
        tally.push(result);
    }
    let report = tally.finish();

    tracing::info!(
        total = report.total_responses,
        dominant = report.dominant_name(),
        alerts = report.high_risk_alerts,
        "aggregate computed"
    );

    report
}

/// Resolve raw classifier output, then aggregate. Any malformed item fails the whole batch.
pub fn aggregate_items(items: &[ClassifiedItem]) -> Result<AggregateReport> {
    let results = items
        .iter()
        .map(ClassificationResult::try_from)
        .collect::<Result<Vec<_>>>()?;
    Ok(aggregate(&results))
}

/// Tally fixed-size shards on scoped threads and merge them.
pub fn aggregate_sharded(results: &[ClassificationResult], shard_size: usize) -> AggregateReport {
    tally_sharded(results, shard_size).finish()
}

/// Aggregate a live batch and keep the per-item alerts alongside the report.
///
/// Batches larger than `shard_size` are tallied in parallel shards; merged in
/// shard order, the alerts keep the input order either way.
pub fn analyze(results: &[ClassificationResult], shard_size: usize) -> BatchAnalysis {
    let tally = if results.len() > shard_size.max(1) {
        tally_sharded(results, shard_size)
    } else {
        let mut tally = BatchTally::default();
        results.iter().for_each(|result| tally.push(result));
        tally
    };
    let (report, alerts) = tally.finish_with_alerts();

    tracing::info!(
        total = report.total_responses,
        dominant = report.dominant_name(),
        alerts = alerts.len(),
        "batch analysed"
    );

    BatchAnalysis {
        processed_count: report.total_responses,
        aggregate_analysis: report,
        alerts,
        saved_response_ids: Vec::new(),
    }
}

fn tally_sharded(results: &[ClassificationResult], shard_size: usize) -> BatchTally {
    let shard_size = shard_size.max(1);

    let tallies: Vec<BatchTally> = thread::scope(|scope| {
        let handles: Vec<_> = results
            .chunks(shard_size)
            .map(|shard| {
                scope.spawn(move || {
                    let mut tally = BatchTally::default();
                    shard.iter().for_each(|result| tally.push(result));
                    tally
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });

    let mut merged = BatchTally::default();
    for tally in tallies {
        merged.merge(tally);
    }

    tracing::debug!(shard_size, "merged sharded aggregate");
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::labels::RiskTier;
    use crate::models::UNKNOWN_LABEL;

    fn item(label: SentimentLabel, confidence: f64) -> ClassificationResult {
        ClassificationResult::new(format!("{label} response"), label, confidence).unwrap()
    }

    fn assert_properties(report: &AggregateReport) {
        let sum: u64 = report.sentiment_distribution.values().sum();
        assert_eq!(sum, report.total_responses);
        assert_eq!(report.sentiment_distribution.len(), 5);
        assert!(report.high_risk_alerts <= report.count(SentimentLabel::Suicidal));
        assert_eq!(
            report.highest_risk_level == RiskTier::Alto,
            report.count(SentimentLabel::Suicidal) >= 1
        );
        if report.total_responses > 0 {
            assert!(report.min_confidence <= report.average_confidence);
            assert!(report.average_confidence <= report.max_confidence);
        }
    }

    #[test]
    fn scenario_mixed_batch_with_one_alert() {
        let report = aggregate(&[
            item(SentimentLabel::Anxiety, 0.80),
            item(SentimentLabel::Suicidal, 0.90),
            item(SentimentLabel::Suicidal, 0.60),
        ]);

        assert_eq!(report.count(SentimentLabel::Anxiety), 1);
        assert_eq!(report.count(SentimentLabel::Suicidal), 2);
        assert_eq!(report.count(SentimentLabel::Anger), 0);
        assert_eq!(report.count(SentimentLabel::Sadness), 0);
        assert_eq!(report.count(SentimentLabel::Frustration), 0);
        assert_eq!(report.dominant_sentiment, Some(SentimentLabel::Suicidal));
        assert_eq!(report.average_confidence, 0.767);
        assert_eq!(report.min_confidence, 0.6);
        assert_eq!(report.max_confidence, 0.9);
        assert_eq!(report.highest_risk_level, RiskTier::Alto);
        assert_eq!(report.high_risk_alerts, 1);
        assert_eq!(report.total_responses, 3);
        assert_properties(&report);
    }

    #[test]
    fn scenario_empty_batch_is_zero_valued() {
        let report = aggregate(&[]);

        assert!(report.sentiment_distribution.values().all(|count| *count == 0));
        assert_eq!(report.sentiment_distribution.len(), 5);
        assert_eq!(report.dominant_sentiment, None);
        assert_eq!(report.dominant_name(), UNKNOWN_LABEL);
        assert_eq!(report.average_confidence, 0.0);
        assert_eq!(report.min_confidence, 0.0);
        assert_eq!(report.max_confidence, 0.0);
        assert_eq!(report.highest_risk_level, RiskTier::Bajo);
        assert_eq!(report.high_risk_alerts, 0);
        assert_eq!(report.total_responses, 0);
    }

    #[test]
    fn scenario_tie_resolves_to_lowest_index() {
        let report = aggregate(&[
            item(SentimentLabel::Anger, 0.5),
            item(SentimentLabel::Sadness, 0.5),
        ]);
        assert_eq!(report.dominant_sentiment, Some(SentimentLabel::Anger));
        assert_eq!(report.highest_risk_level, RiskTier::Medio);
        assert_properties(&report);
    }

    #[test]
    fn scenario_boundary_confidence_does_not_alert() {
        let report = aggregate(&[item(SentimentLabel::Suicidal, 0.70)]);
        assert_eq!(report.high_risk_alerts, 0);
        assert_eq!(report.highest_risk_level, RiskTier::Alto);
        assert_properties(&report);
    }

    #[test]
    fn tie_break_ignores_arrival_order() {
        let forward = vec![
            item(SentimentLabel::Frustration, 0.3),
            item(SentimentLabel::Sadness, 0.4),
            item(SentimentLabel::Frustration, 0.5),
            item(SentimentLabel::Sadness, 0.6),
        ];
        let mut backward = forward.clone();
        backward.reverse();

        let a = aggregate(&forward);
        let b = aggregate(&backward);
        assert_eq!(a.dominant_sentiment, Some(SentimentLabel::Sadness));
        assert_eq!(a, b);
    }

    #[test]
    fn frustration_only_batch_stays_bajo() {
        let report = aggregate(&[item(SentimentLabel::Frustration, 0.99)]);
        assert_eq!(report.highest_risk_level, RiskTier::Bajo);
        assert_eq!(report.dominant_sentiment, Some(SentimentLabel::Frustration));
    }

    #[test]
    fn average_rounds_half_up() {
        // 0.0015 average lands exactly on the rounding boundary in fixed point.
        let report = aggregate(&[
            item(SentimentLabel::Anxiety, 0.001),
            item(SentimentLabel::Anxiety, 0.002),
        ]);
        assert_eq!(report.average_confidence, 0.002);
        assert_eq!(round3(0.1234), 0.123);
        assert_eq!(round3(0.9876), 0.988);
    }

    #[test]
    fn single_item_min_average_max_agree() {
        // Values such as 0.5005 sit just below the decimal in binary; all three
        // statistics must land on the same three-decimal value.
        for i in 0..=10_000 {
            let confidence = i as f64 / 10_000.0;
            let report = aggregate(&[item(SentimentLabel::Anger, confidence)]);
            assert_eq!(report.min_confidence, report.average_confidence, "{confidence}");
            assert_eq!(report.max_confidence, report.average_confidence, "{confidence}");
        }
        assert_eq!(round3(0.5005), 0.501);
    }

    #[test]
    fn average_stays_between_rounded_extremes() {
        for i in 0..500 {
            let low = i as f64 / 1000.0 + 0.0005;
            let high = low + 0.001;
            let report = aggregate(&[
                item(SentimentLabel::Sadness, low),
                item(SentimentLabel::Sadness, high),
            ]);
            assert!(report.min_confidence <= report.average_confidence, "{low}");
            assert!(report.average_confidence <= report.max_confidence, "{high}");
        }
    }

    #[test]
    fn analysis_keeps_alerts_in_input_order() {
        let results = vec![
            ClassificationResult::new("first", SentimentLabel::Suicidal, 0.91).unwrap(),
            item(SentimentLabel::Anxiety, 0.4),
            ClassificationResult::new("second", SentimentLabel::Suicidal, 0.75).unwrap(),
            item(SentimentLabel::Suicidal, 0.70),
        ];

        for shard_size in [1, 2, 100] {
            let analysis = analyze(&results, shard_size);
            let texts: Vec<&str> = analysis.alerts.iter().map(|a| a.text.as_str()).collect();
            assert_eq!(texts, vec!["first", "second"]);
            assert_eq!(analysis.aggregate_analysis, aggregate(&results));
            assert_eq!(analysis.processed_count, 4);
            assert!(analysis.saved_response_ids.is_empty());
        }
    }

    #[test]
    fn analysis_serializes_batch_shape() {
        let analysis = analyze(&[item(SentimentLabel::Suicidal, 0.95)], 16);
        let value = serde_json::to_value(&analysis).unwrap();

        assert_eq!(value["aggregateAnalysis"]["highRiskAlerts"], 1);
        assert_eq!(value["aggregateAnalysis"]["highestRiskLevel"], "ALTO");
        assert_eq!(value["alerts"][0]["confidence"], 0.95);
        assert_eq!(value["processedCount"], 1);
        assert_eq!(value["savedResponseIds"], serde_json::json!([]));
    }

    #[test]
    fn sharded_aggregation_matches_single_pass() {
        let labels = SentimentLabel::ALL;
        let results: Vec<ClassificationResult> = (0..97)
            .map(|i| {
                let label = labels[(i * 7) % labels.len()];
                item(label, ((i * 37) % 100) as f64 / 100.0)
            })
            .collect();

        let single = aggregate(&results);
        for shard_size in [0, 1, 3, 10, 64, 500] {
            assert_eq!(aggregate_sharded(&results, shard_size), single);
        }

        let mut shuffled = results.clone();
        shuffled.rotate_left(41);
        shuffled.swap(3, 90);
        assert_eq!(aggregate(&shuffled), single);
        assert_properties(&single);
    }

    #[test]
    fn merging_empty_tally_is_identity() {
        let mut tally = BatchTally::default();
        tally.push(&item(SentimentLabel::Anger, 0.42));
        tally.merge(BatchTally::default());
        let report = tally.finish();
        assert_eq!(report.min_confidence, 0.42);
        assert_eq!(report.max_confidence, 0.42);
        assert_eq!(report.average_confidence, 0.42);
    }

    #[test]
    fn malformed_item_fails_the_whole_batch() {
        let items = vec![
            ClassifiedItem {
                text: "fine".to_string(),
                label_index: 2,
                confidence: 0.5,
            },
            ClassifiedItem {
                text: "broken".to_string(),
                label_index: 9,
                confidence: 0.5,
            },
        ];
        assert!(matches!(
            aggregate_items(&items),
            Err(EngineError::InvalidLabelIndex(9))
        ));
    }

    #[test]
    fn serializes_external_shape() {
        let report = aggregate(&[item(SentimentLabel::Anxiety, 0.8)]);
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["sentimentDistribution"]["ANXIETY"], 1);
        assert_eq!(value["sentimentDistribution"]["FRUSTRATION"], 0);
        assert_eq!(value["dominantSentiment"], "ANXIETY");
        assert_eq!(value["highestRiskLevel"], "MEDIO");
        assert_eq!(value["highRiskAlerts"], 0);
        assert_eq!(value["totalResponses"], 1);

        let empty = serde_json::to_value(aggregate(&[])).unwrap();
        assert_eq!(empty["dominantSentiment"], "UNKNOWN");
        assert_eq!(empty["highestRiskLevel"], "BAJO");
    }
}
