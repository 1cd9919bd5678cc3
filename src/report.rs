use std::fmt::Write;

use crate::labels::SentimentLabel;
use crate::models::{AggregateReport, AlertContext, BatchAnalysis, SessionReport};

fn write_aggregate(output: &mut String, report: &AggregateReport) {
    let _ = writeln!(output, "## Sentiment Mix");

    if report.total_responses == 0 {
        let _ = writeln!(output, "No responses recorded.");
    } else {
        let _ = writeln!(output, "| Label | Risk | Count |");
        let _ = writeln!(output, "|---|---|---|");
        for label in SentimentLabel::ALL {
            let _ = writeln!(
                output,
                "| {} | {} | {} |",
                label.name(),
                label.risk_tier(),
                report.count(label)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Responses: {}", report.total_responses);
    let _ = writeln!(output, "- Dominant sentiment: {}", report.dominant_name());
    let _ = writeln!(
        output,
        "- Confidence: avg {:.3} (min {:.3}, max {:.3})",
        report.average_confidence, report.min_confidence, report.max_confidence
    );
    let _ = writeln!(output, "- Highest risk level: {}", report.highest_risk_level);
    let _ = writeln!(output, "- High-risk alerts: {}", report.high_risk_alerts);
}

pub fn render_batch(report: &AggregateReport) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# Intake Sentiment Report");
    let _ = writeln!(output);
    write_aggregate(&mut output, report);
    output
}

/// Batch report followed by the alerts behind it and any persisted response ids.
pub fn render_analysis(analysis: &BatchAnalysis) -> String {
    let mut output = render_batch(&analysis.aggregate_analysis);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Alerts");
    if analysis.alerts.is_empty() {
        let _ = writeln!(output, "No responses above the alert threshold.");
    } else {
        for alert in analysis.alerts.iter() {
            let _ = writeln!(output, "- confidence {:.3}: {}", alert.confidence, alert.text);
        }
    }

    if !analysis.saved_response_ids.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Saved Responses");
        for id in analysis.saved_response_ids.iter() {
            let _ = writeln!(output, "- {id}");
        }
    }

    output
}

pub fn render_session(session_report: &SessionReport) -> String {
    let session = &session_report.session;
    let mut output = String::new();

    let _ = writeln!(output, "# Session Sentiment Report: {}", session.title);
    let _ = writeln!(
        output,
        "Session {} for patient {} with clinician {} (started {})",
        session.session_id,
        session.patient_id,
        session.clinician_id,
        session.started_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    write_aggregate(&mut output, &session_report.aggregate);
    output
}

pub fn render_alerts(alerts: &[AlertContext], days_back: i64) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# High-Risk Alerts");
    let _ = writeln!(output, "Suicidal responses above threshold in the last {days_back} days");
    let _ = writeln!(output);

    if alerts.is_empty() {
        let _ = writeln!(output, "No alerts in this window.");
    } else {
        for alert in alerts {
            let _ = writeln!(
                output,
                "- {} confidence {:.3}: patient {} (session {}, clinician {})",
                alert.created_at.format("%Y-%m-%d"),
                alert.confidence,
                alert.patient_id,
                alert.session_id,
                alert.clinician_id
            );
        }
    }

    output
}
