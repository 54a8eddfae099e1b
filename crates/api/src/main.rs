use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lotto_core::cache::file::FileBundleStore;
use lotto_core::cache::{BundleStore, DailyCache};
use lotto_core::config::{EngineConfig, Settings};
use lotto_core::domain::draw::DrawResult;
use lotto_core::domain::recommendation::RecommendationBundle;
use lotto_core::engine::refiner::{
    PositionDistributionProvider, TrainedDistributions, UniformDistributions,
};
use lotto_core::engine::RecommendationEngine;
use lotto_core::evaluator::{DrawEvaluation, RankEvaluator};
use lotto_core::ingest::{DrawArchive, HistorySource, StaticHistory};
use lotto_core::scheduler::{refinement_channel, EnsembleRunner};
use lotto_core::stats::{frequency_report, FrequencyReport};
use lotto_core::storage::PgStore;
use lotto_core::time::SystemClock;

const DEFAULT_IDENTITY: &str = "global";
const MAX_IDENTITY_LEN: usize = 128;

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

    let config = Arc::new(EngineConfig::from_env()?);
    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match lotto_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let store: Arc<dyn BundleStore>;
    let history: Arc<dyn HistorySource>;
    let draws: Option<Arc<dyn DrawArchive>>;
    match &pool {
        Some(pool) => {
            let pg = Arc::new(PgStore::new(pool.clone()));
            store = pg.clone();
            history = pg.clone();
            let archive: Arc<dyn DrawArchive> = pg;
            draws = Some(archive);
        }
        None => {
            let dir = settings.daily_store_dir();
            tracing::warn!(dir, "no database; bundles go to files and history is empty");
            store = Arc::new(FileBundleStore::new(dir));
            history = Arc::new(StaticHistory::default());
            draws = None;
        }
    }

    let engine = RecommendationEngine::new(config.clone(), load_distributions(&settings));
    let notifier = lotto_core::notify::from_webhook(settings.slack_webhook_url.as_deref());

    let (queue, worker) = refinement_channel();
    let cache = Arc::new(
        DailyCache::new(store, history.clone(), engine.clone(), Arc::new(SystemClock))
            .with_refinement(queue),
    );
    tracing::info!(store = cache.store_name(), "daily cache ready");
    worker.spawn(
        cache.clone(),
        Arc::new(EnsembleRunner::new(history, engine)),
        notifier.clone(),
    );

    let evaluator = pool.map(|pool| {
        Arc::new(
            RankEvaluator::new(Arc::new(PgStore::new(pool)), config.clone())
                .with_notifier(notifier),
        )
    });

    let state = AppState {
        config,
        cache,
        draws,
        evaluator,
    };

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/recommendations/daily", get(get_daily_recommendations))
        .route("/stats/frequency", get(frequency_stats))
        .route("/draws/latest", get(latest_draw))
        .route("/draws/:draw_number/evaluate", post(evaluate_draw))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Trained per-position distributions when an artifact is configured and loads, else uniform.
fn load_distributions(settings: &Settings) -> Arc<dyn PositionDistributionProvider> {
    let Some(path) = settings
        .position_model_path
        .as_deref()
        .filter(|p| !p.trim().is_empty())
    else {
        tracing::info!("POSITION_MODEL_PATH not set; using uniform position distributions");
        return Arc::new(UniformDistributions);
    };

    match TrainedDistributions::load_json(path) {
        Ok(trained) => {
            tracing::info!(path, "loaded position distributions");
            Arc::new(trained)
        }
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::warn!(path, error = %e, "position distributions unavailable; using uniform");
            Arc::new(UniformDistributions)
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    config: Arc<EngineConfig>,
    cache: Arc<DailyCache>,
    draws: Option<Arc<dyn DrawArchive>>,
    evaluator: Option<Arc<RankEvaluator>>,
}

#[derive(Debug, Default, Deserialize)]
struct DailyQuery {
    user_key: Option<String>,
    num_sets: Option<usize>,
}

async fn get_daily_recommendations(
    State(state): State<AppState>,
    Query(query): Query<DailyQuery>,
) -> Result<Json<RecommendationBundle>, StatusCode> {
    let set_count = state
        .config
        .resolve_set_count(query.num_sets)
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let identity = query
        .user_key
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_IDENTITY);
    if identity.len() > MAX_IDENTITY_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    let bundle = state
        .cache
        .get_or_create(identity, set_count)
        .await
        .map_err(|e| {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "daily recommendation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(bundle))
}

#[derive(Debug, Default, Deserialize)]
struct FrequencyQuery {
    window: Option<usize>,
}

async fn frequency_stats(
    State(state): State<AppState>,
    Query(query): Query<FrequencyQuery>,
) -> Result<Json<FrequencyReport>, StatusCode> {
    let Some(draws) = &state.draws else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let window = query.window.unwrap_or(state.config.hot_cold_window);
    if window == 0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let history = draws.load_history().await.map_err(|e| {
        sentry_anyhow::capture_anyhow(&e);
        tracing::error!(error = %e, "frequency stats failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(frequency_report(&state.config, &history, window)))
}

async fn latest_draw(State(state): State<AppState>) -> Result<Json<DrawResult>, StatusCode> {
    let Some(draws) = &state.draws else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let latest = draws.latest_draw().await.map_err(|e| {
        sentry_anyhow::capture_anyhow(&e);
        tracing::error!(error = %e, "latest draw lookup failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    latest.map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn evaluate_draw(
    State(state): State<AppState>,
    Path(draw_number): Path<i32>,
) -> Result<Json<DrawEvaluation>, StatusCode> {
    let Some(evaluator) = &state.evaluator else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    if draw_number < 1 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let evaluation = evaluator.evaluate_draw(draw_number).await.map_err(|e| {
        sentry_anyhow::capture_anyhow(&e);
        tracing::error!(draw_number, error = %e, "draw evaluation failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(evaluation))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
