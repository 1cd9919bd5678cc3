use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use intake_sentiment_risk::labels::SentimentLabel;
use intake_sentiment_risk::models::{ClassificationResult, ClassifiedItem};
use intake_sentiment_risk::reconcile::Reconciler;
use intake_sentiment_risk::{aggregate, db, report, risk};

/// Batches larger than this are tallied in parallel shards.
const SHARD_SIZE: usize = 4096;

#[derive(Parser)]
#[command(name = "intake-sentiment-risk")]
#[command(about = "Sentiment aggregation and risk escalation for clinical intake responses", long_about = None)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,

    #[arg(long, env = "INTAKE_DB_MAX_CONNECTIONS", default_value_t = 5, global = true)]
    max_connections: u32,

    /// Deadline for each store query
    #[arg(long, env = "INTAKE_QUERY_TIMEOUT_SECS", default_value_t = 10, global = true)]
    query_timeout_secs: u64,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Markdown,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed sessions and responses
    Seed,
    /// Import classified responses from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List the label registry
    Labels,
    /// Aggregate a file of classifier output (JSON array or CSV)
    Aggregate {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
        /// Also persist the batch under this existing session
        #[arg(long)]
        save_session: Option<Uuid>,
    },
    /// Aggregate previously stored responses by id
    AggregateIds {
        #[arg(required = true)]
        ids: Vec<Uuid>,
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },
    /// Aggregate every response of a session
    Session {
        session_id: Uuid,
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },
    /// List high-risk alerts from the trailing window
    Alerts {
        #[arg(long, default_value_t = risk::DEFAULT_ALERT_DAYS_BACK)]
        days_back: i64,
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },
    /// Write a markdown session report
    Report {
        #[arg(long)]
        session: Uuid,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Labels => {
            print_labels()?;
        }
        Commands::Aggregate {
            input,
            format,
            save_session,
        } => {
            let items = read_items(input)?;
            let results = items
                .iter()
                .map(ClassificationResult::try_from)
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("invalid classifier output in {}", input.display()))?;

            let mut analysis = aggregate::analyze(&results, SHARD_SIZE);

            if let Some(session_id) = save_session {
                let pool = connect(&cli).await?;
                analysis.saved_response_ids =
                    db::store_results(&pool, *session_id, &results).await?;
            }

            match format {
                Format::Json => print_json(&analysis)?,
                Format::Markdown => print!("{}", report::render_analysis(&analysis)),
            }
        }
        Commands::InitDb => {
            let pool = connect(&cli).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&cli).await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let pool = connect(&cli).await?;
            let inserted = db::import_csv(&pool, csv).await?;
            println!("Inserted {inserted} responses from {}.", csv.display());
        }
        Commands::AggregateIds { ids, format } => {
            let reconciler = reconciler(&cli).await?;
            let summary = reconciler.aggregate_by_ids(ids).await?;
            match format {
                Format::Json => print_json(&summary)?,
                Format::Markdown => print!("{}", report::render_batch(&summary)),
            }
        }
        Commands::Session { session_id, format } => {
            let reconciler = reconciler(&cli).await?;
            let session = reconciler.distribution_by_session(*session_id).await?;
            match format {
                Format::Json => print_json(&session)?,
                Format::Markdown => print!("{}", report::render_session(&session)),
            }
        }
        Commands::Alerts { days_back, format } => {
            let reconciler = reconciler(&cli).await?;
            let alerts = reconciler.high_risk_alerts(*days_back, Utc::now()).await?;
            match format {
                Format::Json => print_json(&serde_json::json!({
                    "alerts": alerts,
                    "totalAlerts": alerts.len(),
                    "daysBack": days_back,
                }))?,
                Format::Markdown => print!("{}", report::render_alerts(&alerts, *days_back)),
            }
        }
        Commands::Report { session, out } => {
            let reconciler = reconciler(&cli).await?;
            let session = reconciler.distribution_by_session(*session).await?;
            std::fs::write(out, report::render_session(&session))
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("intake_sentiment_risk=debug,sqlx=info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("intake_sentiment_risk=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn connect(cli: &Cli) -> anyhow::Result<PgPool> {
    let database_url = cli
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .acquire_timeout(Duration::from_secs(cli.query_timeout_secs))
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn reconciler(cli: &Cli) -> anyhow::Result<Reconciler<db::PgStore>> {
    let pool = connect(cli).await?;
    let store = db::PgStore::new(pool, Duration::from_secs(cli.query_timeout_secs));
    Ok(Reconciler::new(store))
}

fn read_items(path: &Path) -> anyhow::Result<Vec<ClassifiedItem>> {
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    if is_csv {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let items = reader
            .deserialize::<ClassifiedItem>()
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(items)
    } else {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }
}

fn print_labels() -> anyhow::Result<()> {
    let labels: Vec<serde_json::Value> = SentimentLabel::ALL
        .iter()
        .map(|label| {
            serde_json::json!({
                "id": label.index(),
                "name": label.name(),
                "displayName": label.display_name(),
                "description": label.description(),
                "riskLevel": label.risk_tier(),
            })
        })
        .collect();

    print_json(&serde_json::json!({
        "labels": labels,
        "totalClasses": labels.len(),
    }))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
