use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::labels::SentimentLabel;
use crate::models::{AlertCandidate, ClassificationResult, SessionInfo, StoredResponse};
use crate::reconcile::ResponseStore;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed response store with a per-query deadline.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    async fn timed<T, F>(&self, what: &str, query: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>> + Send,
    {
        match tokio::time::timeout(self.query_timeout, query).await {
            Ok(result) => result.map_err(|err| {
                tracing::error!(query = what, error = %err, "store query failed");
                EngineError::from(err)
            }),
            Err(_) => {
                tracing::error!(query = what, timeout = ?self.query_timeout, "store query timed out");
                Err(EngineError::unavailable(format!(
                    "{what} timed out after {:?}",
                    self.query_timeout
                )))
            }
        }
    }
}

const RESPONSE_COLUMNS: &str = "r.id, r.session_id, r.text, r.label, r.confidence, r.created_at";

fn response_from_row(row: &PgRow) -> std::result::Result<StoredResponse, sqlx::Error> {
    Ok(StoredResponse {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        text: row.try_get("text")?,
        label: row.try_get("label")?,
        confidence: row.try_get("confidence")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ResponseStore for PgStore {
    async fn fetch_by_ids(&self, ids: &[Uuid]) -> Result<Vec<StoredResponse>> {
        let query = format!(
            "SELECT {RESPONSE_COLUMNS} FROM intake_risk.responses r WHERE r.id = ANY($1)"
        );
        let rows = self
            .timed(
                "fetch_by_ids",
                sqlx::query(&query).bind(ids.to_vec()).fetch_all(&self.pool),
            )
            .await?;

        rows.iter()
            .map(response_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(EngineError::from)
    }

    async fn fetch_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<(SessionInfo, Vec<StoredResponse>)>> {
        let session = self
            .timed(
                "fetch_session",
                sqlx::query(
                    r#"
                    SELECT id, patient_id, clinician_id, title, started_at
                    FROM intake_risk.sessions
                    WHERE id = $1
                    "#,
                )
                .bind(session_id)
                .fetch_optional(&self.pool),
            )
            .await?;

        let Some(row) = session else {
            return Ok(None);
        };

        let info = SessionInfo {
            session_id: row.try_get("id")?,
            patient_id: row.try_get("patient_id")?,
            clinician_id: row.try_get("clinician_id")?,
            title: row.try_get("title")?,
            started_at: row.try_get("started_at")?,
        };

        let query = format!(
            "SELECT {RESPONSE_COLUMNS} FROM intake_risk.responses r WHERE r.session_id = $1"
        );
        let rows = self
            .timed(
                "fetch_session_responses",
                sqlx::query(&query).bind(session_id).fetch_all(&self.pool),
            )
            .await?;

        let responses = rows
            .iter()
            .map(response_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Some((info, responses)))
    }

    async fn fetch_created_since(&self, since: DateTime<Utc>) -> Result<Vec<AlertCandidate>> {
        let query = format!(
            "SELECT {RESPONSE_COLUMNS}, s.patient_id, s.clinician_id \
             FROM intake_risk.responses r \
             JOIN intake_risk.sessions s ON s.id = r.session_id \
             WHERE r.created_at >= $1"
        );
        let rows = self
            .timed(
                "fetch_created_since",
                sqlx::query(&query).bind(since).fetch_all(&self.pool),
            )
            .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            candidates.push(AlertCandidate {
                response: response_from_row(row)?,
                patient_id: row.try_get("patient_id")?,
                clinician_id: row.try_get("clinician_id")?,
            });
        }

        Ok(candidates)
    }
}

async fn upsert_session(conn: &mut PgConnection, session: &SessionInfo) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO intake_risk.sessions (id, patient_id, clinician_id, title, started_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (id) DO UPDATE
        SET title = EXCLUDED.title
        "#,
    )
    .bind(session.session_id)
    .bind(session.patient_id)
    .bind(session.clinician_id)
    .bind(&session.title)
    .bind(session.started_at)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("failed to upsert session {}", session.session_id))?;
    Ok(())
}

async fn insert_response(
    conn: &mut PgConnection,
    session_id: Uuid,
    result: &ClassificationResult,
    created_at: DateTime<Utc>,
    source_key: &str,
) -> anyhow::Result<Option<Uuid>> {
    let id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"
        INSERT INTO intake_risk.responses
        (id, session_id, text, label, confidence, created_at, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(session_id)
    .bind(&result.text)
    .bind(result.label.name())
    .bind(result.confidence)
    .bind(created_at)
    .bind(source_key)
    .execute(&mut *conn)
    .await?;

    Ok((inserted.rows_affected() > 0).then_some(id))
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let now = Utc::now();
    let sessions = vec![
        SessionInfo {
            session_id: Uuid::parse_str("5b1f0c3e-8a0d-4f43-9d1e-0f6c2e7a9b11")?,
            patient_id: Uuid::parse_str("9e2a7d4c-3b5f-4c1a-8e6d-2f4b6a8c0d13")?,
            clinician_id: Uuid::parse_str("1c3e5a7b-9d2f-4b6c-8a0e-3d5f7b9c1e24")?,
            title: "Initial intake questionnaire".to_string(),
            started_at: now - chrono::Duration::days(3),
        },
        SessionInfo {
            session_id: Uuid::parse_str("7d2e4f6a-1b3c-4d5e-9f0a-6b8c0d2e4f35")?,
            patient_id: Uuid::parse_str("2a4c6e8f-0b1d-4e3f-a5b7-c9d1e3f5a746")?,
            clinician_id: Uuid::parse_str("1c3e5a7b-9d2f-4b6c-8a0e-3d5f7b9c1e24")?,
            title: "Follow-up check-in".to_string(),
            started_at: now - chrono::Duration::days(1),
        },
    ];

    let mut tx = pool.begin().await?;

    for session in sessions.iter() {
        upsert_session(&mut tx, session).await?;
    }

    let responses = vec![
        (
            "seed-001",
            0,
            "I keep waking up at night worrying about work",
            SentimentLabel::Anxiety,
            0.82,
            3,
        ),
        (
            "seed-002",
            0,
            "Some days I feel like there is no point in going on",
            SentimentLabel::Suicidal,
            0.91,
            3,
        ),
        (
            "seed-003",
            0,
            "Nobody at home listens to me anymore",
            SentimentLabel::Sadness,
            0.67,
            3,
        ),
        (
            "seed-004",
            1,
            "The waiting list for therapy is ridiculous",
            SentimentLabel::Frustration,
            0.78,
            1,
        ),
        (
            "seed-005",
            1,
            "I snapped at my brother again yesterday",
            SentimentLabel::Anger,
            0.74,
            1,
        ),
        (
            "seed-006",
            1,
            "Sometimes I wonder if anyone would notice if I was gone",
            SentimentLabel::Suicidal,
            0.68,
            1,
        ),
    ];

    for (source_key, session_index, text, label, confidence, days_ago) in responses {
        let result = ClassificationResult::new(text, label, confidence)?;
        insert_response(
            &mut tx,
            sessions[session_index].session_id,
            &result,
            now - chrono::Duration::days(days_ago),
            source_key,
        )
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        session_id: Uuid,
        patient_id: Uuid,
        clinician_id: Uuid,
        title: String,
        text: String,
        label_index: i64,
        confidence: f64,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut rows = Vec::new();

    // Resolve every row before writing so a malformed label rejects the whole file.
    for (line, record) in reader.deserialize::<CsvRow>().enumerate() {
        let row = record?;
        let label = SentimentLabel::from_index(row.label_index)
            .with_context(|| format!("row {}", line + 1))?;
        let result = ClassificationResult::new(row.text.clone(), label, row.confidence)
            .with_context(|| format!("row {}", line + 1))?;
        rows.push((row, result));
    }

    let now = Utc::now();
    let mut inserted = 0usize;
    let mut tx = pool.begin().await?;

    for (row, result) in rows {
        upsert_session(
            &mut tx,
            &SessionInfo {
                session_id: row.session_id,
                patient_id: row.patient_id,
                clinician_id: row.clinician_id,
                title: row.title,
                started_at: now,
            },
        )
        .await?;

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        if insert_response(&mut tx, row.session_id, &result, now, &source_key)
            .await?
            .is_some()
        {
            inserted += 1;
        }
    }

    tx.commit().await?;
    tracing::info!(inserted, path = %csv_path.display(), "csv import finished");
    Ok(inserted)
}

/// Persist a classified batch under an existing session and return the new response ids.
///
/// The batch is written in one transaction; a failed insert leaves nothing behind.
pub async fn store_results(
    pool: &PgPool,
    session_id: Uuid,
    results: &[ClassificationResult],
) -> anyhow::Result<Vec<Uuid>> {
    let mut tx = pool.begin().await?;

    let exists: bool =
        sqlx::query("SELECT EXISTS (SELECT 1 FROM intake_risk.sessions WHERE id = $1) AS found")
            .bind(session_id)
            .fetch_one(&mut *tx)
            .await?
            .get("found");
    if !exists {
        anyhow::bail!("session {session_id} does not exist");
    }

    let now = Utc::now();
    let mut ids = Vec::with_capacity(results.len());
    for result in results {
        let source_key = format!("batch-{}", Uuid::new_v4());
        if let Some(id) = insert_response(&mut tx, session_id, result, now, &source_key).await? {
            ids.push(id);
        }
    }

    tx.commit().await?;
    tracing::info!(%session_id, stored = ids.len(), "batch persisted");
    Ok(ids)
}
