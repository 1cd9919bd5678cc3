//! Store-backed aggregation.
//!
//! The store only hands back persisted rows; every report is assembled by the same
//! [`aggregate`] function used for live batches, so both paths agree by construction.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::aggregate::aggregate;
use crate::error::{EngineError, Result};
use crate::models::{
    AggregateReport, AlertCandidate, AlertContext, SessionInfo, SessionReport, StoredResponse,
};
use crate::risk::{alert_window_start, is_alert};

#[async_trait]
pub trait ResponseStore: Send + Sync {
    /// Rows whose id is in `ids`. Unknown ids are absent from the result.
    async fn fetch_by_ids(&self, ids: &[Uuid]) -> Result<Vec<StoredResponse>>;

    async fn fetch_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<(SessionInfo, Vec<StoredResponse>)>>;

    /// Rows created at or after `since`, with patient and clinician context.
    async fn fetch_created_since(&self, since: DateTime<Utc>) -> Result<Vec<AlertCandidate>>;
}

pub struct Reconciler<S> {
    store: S,
}

impl<S: ResponseStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn aggregate_by_ids(&self, ids: &[Uuid]) -> Result<AggregateReport> {
        let unique: Vec<Uuid> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        if unique.is_empty() {
            tracing::warn!("aggregate requested for an empty id list");
            return Ok(aggregate(&[]));
        }

        tracing::info!(ids = unique.len(), "aggregating persisted responses");
        let rows = self.store.fetch_by_ids(&unique).await?;

        let found: BTreeSet<Uuid> = rows.iter().map(|row| row.id).collect();
        let missing: Vec<Uuid> = unique
            .iter()
            .filter(|id| !found.contains(id))
            .copied()
            .collect();
        if !missing.is_empty() {
            tracing::warn!(
                requested = unique.len(),
                missing = missing.len(),
                "response ids not found in the store"
            );
            return Err(EngineError::ResponsesNotFound(missing));
        }

        let results = rows
            .iter()
            .map(StoredResponse::to_result)
            .collect::<Result<Vec<_>>>()?;
        Ok(aggregate(&results))
    }

    pub async fn distribution_by_session(&self, session_id: Uuid) -> Result<SessionReport> {
        tracing::info!(%session_id, "aggregating session responses");
        let (session, rows) = self
            .store
            .fetch_session(session_id)
            .await?
            .ok_or(EngineError::SessionNotFound(session_id))?;

        let results = rows
            .iter()
            .map(StoredResponse::to_result)
            .collect::<Result<Vec<_>>>()?;

        Ok(SessionReport {
            session,
            aggregate: aggregate(&results),
        })
    }

    /// Alerts raised in the trailing `days_back` days, strongest first.
    pub async fn high_risk_alerts(
        &self,
        days_back: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<AlertContext>> {
        let since = alert_window_start(days_back, now);
        let candidates = self.store.fetch_created_since(since).await?;

        let mut alerts = Vec::new();
        for candidate in candidates {
            if candidate.response.created_at < since {
                continue;
            }
            let result = candidate.response.to_result()?;
            if !is_alert(&result) {
                continue;
            }
            alerts.push(AlertContext {
                response_id: candidate.response.id,
                session_id: candidate.response.session_id,
                patient_id: candidate.patient_id,
                clinician_id: candidate.clinician_id,
                text: result.text,
                confidence: result.confidence,
                created_at: candidate.response.created_at,
            });
        }

        alerts.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });

        tracing::info!(days_back, alerts = alerts.len(), "high-risk alerts collected");
        Ok(alerts)
    }
}
