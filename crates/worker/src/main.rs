use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lotto_core::config::{EngineConfig, Settings};
use lotto_core::domain::pool::NumberPool;
use lotto_core::engine::refiner::TrainedDistributions;
use lotto_core::evaluator::RankEvaluator;
use lotto_core::ingest::provider::HttpJsonDrawProvider;
use lotto_core::ingest::HistorySource;
use lotto_core::storage::lock::DrawLock;
use lotto_core::storage::PgStore;

mod ingest;

#[derive(Debug, Parser)]
#[command(name = "lotto_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Classify stored recommendations against a draw (defaults to the latest stored draw).
    Evaluate {
        #[arg(long)]
        draw: Option<i32>,
    },
    /// Fetch official draw results into the database, stopping at the first unpublished draw.
    Ingest {
        /// First draw to fetch. Defaults to the one after the latest stored draw.
        #[arg(long)]
        from: Option<i32>,
        #[arg(long)]
        to: Option<i32>,
    },
    /// Fit per-position distributions from the stored history and write them as JSON.
    FitPositions {
        #[arg(long)]
        out: PathBuf,
        /// Additive smoothing per pool number.
        #[arg(long, default_value_t = 1.0)]
        alpha: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let config = Arc::new(EngineConfig::from_env()?);

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    lotto_core::storage::migrate(&pool).await?;
    let store = PgStore::new(pool.clone());

    let result = match args.command {
        Command::Evaluate { draw } => evaluate(&settings, config, &store, draw).await,
        Command::Ingest { from, to } => {
            run_ingest(&settings, NumberPool::from_config(&config), &store, from, to).await
        }
        Command::FitPositions { out, alpha } => fit_positions(&config, &store, out, alpha).await,
    };

    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %err, "worker run failed");
    }
    result
}

async fn evaluate(
    settings: &Settings,
    config: Arc<EngineConfig>,
    store: &PgStore,
    draw: Option<i32>,
) -> anyhow::Result<()> {
    let draw_number = match draw {
        Some(n) => n,
        None => store
            .latest_draw_number()
            .await?
            .context("no draws stored; run `ingest` first or pass --draw")?,
    };

    let Some(draw_lock) = DrawLock::try_acquire(store.pool(), draw_number).await? else {
        tracing::warn!(draw_number, "draw lock not acquired; another evaluation in progress");
        return Ok(());
    };
    tracing::info!(draw_number = draw_lock.draw_number(), "draw lock acquired");

    let notifier = lotto_core::notify::from_webhook(settings.slack_webhook_url.as_deref());
    let evaluator =
        RankEvaluator::new(Arc::new(store.clone()), config).with_notifier(notifier);
    let result = evaluator.evaluate_draw(draw_number).await;

    if let Err(err) = draw_lock.release().await {
        tracing::warn!(draw_number, error = %err, "failed to release draw lock");
    }

    let evaluation = result?;
    println!("{}", serde_json::to_string_pretty(&evaluation)?);
    // Let the spawned webhook post finish before the runtime shuts down.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    Ok(())
}

async fn run_ingest(
    settings: &Settings,
    pool: NumberPool,
    store: &PgStore,
    from: Option<i32>,
    to: Option<i32>,
) -> anyhow::Result<()> {
    let from = match from {
        Some(n) => n,
        None => store.latest_draw_number().await?.map_or(1, |n| n + 1),
    };
    let provider = HttpJsonDrawProvider::from_settings(settings, pool)?;

    let report = ingest::ingest_draws(&provider, store, from, to).await?;
    tracing::info!(
        from,
        fetched = report.fetched,
        inserted = report.inserted,
        last_draw = ?report.last_draw,
        "draw ingest finished"
    );
    Ok(())
}

async fn fit_positions(
    config: &EngineConfig,
    store: &PgStore,
    out: PathBuf,
    alpha: f64,
) -> anyhow::Result<()> {
    anyhow::ensure!(alpha >= 0.0, "--alpha must be >= 0 (got {alpha})");
    let history = store.load_history().await?;
    anyhow::ensure!(!history.is_empty(), "no draws stored; run `ingest` first");

    let pool = NumberPool::from_config(config);
    let trained = TrainedDistributions::fit(&history, &pool, alpha, config.freq_decay_half_life);
    trained.save_json(&out)?;

    tracing::info!(draws = history.len(), out = %out.display(), "position distributions written");
    Ok(())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
