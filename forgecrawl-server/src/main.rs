//! Forgecrawl Server - HTTP dispatcher for the repository crawler fleet
//!
//! Stateless composition of the hoster registry, the state manager, the
//! run resolver, and the repository sink. Workers poll for blocks and PUT
//! parsed repositories back to the callback URL stamped on each block.

mod config;
mod dispatch;
mod metrics;
mod registry;
mod sink;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use forgecrawl_core::{now_ts, Block, Hoster, HosterType};
use forgecrawl_state::{
    MemoryStateStore, PostgresStateStore, RunResolver, StateManager, StateStore,
};

use config::ControllerConfig;
use dispatch::{issue_block, pick_stalest_crawlable};
use metrics::{ControllerMetrics, HosterTypeLabel};
use registry::{HosterRegistry, RegisterHosterRequest, RegistryError};
use sink::{MemoryRepoSink, PostgresRepoSink, RepoSink};

/// Application state shared across handlers
struct AppState {
    registry: HosterRegistry,
    manager: Arc<StateManager>,
    resolver: RunResolver,
    sink: Arc<dyn RepoSink>,
    metrics: ControllerMetrics,
    external_url: Url,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let controller_config = ControllerConfig::from_env()?;

    // Connect to the shared store; fall back to in-process state when no
    // database is configured or reachable.
    let pool = match &controller_config.database_url {
        Some(url) => match PgPoolOptions::new().max_connections(5).connect(url).await {
            Ok(pool) => {
                info!("Connected to database");
                Some(pool)
            }
            Err(e) => {
                warn!(
                    "Failed to connect to database: {}. Running without persistence.",
                    e
                );
                None
            }
        },
        None => {
            info!("DATABASE_URL not set. Running without persistence.");
            None
        }
    };

    let (store, repo_sink): (Arc<dyn StateStore>, Arc<dyn RepoSink>) = match &pool {
        Some(pool) => {
            let store = PostgresStateStore::new(pool.clone());
            store.ensure_schema().await?;
            let repo_sink = PostgresRepoSink::new(pool.clone());
            repo_sink.ensure_schema().await?;
            (Arc::new(store), Arc::new(repo_sink))
        }
        None => (
            Arc::new(MemoryStateStore::new()),
            Arc::new(MemoryRepoSink::new()),
        ),
    };

    let registry = HosterRegistry::new(pool);
    registry.load().await?;

    let manager = Arc::new(StateManager::new(store, controller_config.crawl.clone()));
    let state = Arc::new(AppState {
        registry,
        manager: manager.clone(),
        resolver: RunResolver::new(manager),
        sink: repo_sink,
        metrics: ControllerMetrics::new(),
        external_url: controller_config.external_url.clone(),
    });

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(serve_metrics))
        .route("/hosters", get(list_hosters).post(register_hoster))
        .route("/hosters/:hid/state", get(hoster_state))
        .route("/hosters/:hid/block", get(get_block))
        .route(
            "/hosters/:hid/loadbalanced_block",
            get(get_loadbalanced_block),
        )
        .route("/hosters/:hid", put(add_repos_bulk))
        .route("/hosters/:hid/", put(add_repos_bulk))
        .route("/hosters/:hid/:block_uid", put(add_repos))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("Starting forgecrawl server on {}", controller_config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&controller_config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn serve_metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.encode()
}

fn internal_error<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn error_body(status: StatusCode, msg: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({"status": "error", "msg": msg})))
}

// === Hoster registry endpoints ===

async fn list_hosters(State(state): State<Arc<AppState>>) -> Json<Vec<Hoster>> {
    Json(state.registry.list().await)
}

async fn register_hoster(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterHosterRequest>,
) -> Result<Json<Hoster>, (StatusCode, String)> {
    let hoster = state.registry.register(req).await.map_err(|e| match e {
        RegistryError::UnknownType(_) => (StatusCode::BAD_REQUEST, e.to_string()),
        RegistryError::Store(_) => internal_error(e),
    })?;
    Ok(Json(hoster))
}

// GET /hosters/:hid/state
async fn hoster_state(
    State(state): State<Arc<AppState>>,
    Path(hid): Path<i64>,
) -> Result<Json<Vec<Block>>, (StatusCode, String)> {
    let hoster = lookup_hoster(&state, hid).await?;
    let blocks = state
        .manager
        .get_blocks(&hoster.prefix())
        .await
        .map_err(internal_error)?;
    Ok(Json(blocks))
}

async fn lookup_hoster(state: &AppState, hid: i64) -> Result<Hoster, (StatusCode, String)> {
    state
        .registry
        .get(hid)
        .await
        .ok_or((StatusCode::NOT_FOUND, format!("Hoster {hid} not found")))
}

// === Block dispatch endpoints ===

// GET /hosters/:hid/block
async fn get_block(
    State(state): State<Arc<AppState>>,
    Path(hid): Path<i64>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let hoster = lookup_hoster(&state, hid).await?;
    let response = issue_block(&state.manager, &state.metrics, &state.external_url, &hoster)
        .await
        .map_err(internal_error)?;
    Ok(Json(serde_json::to_value(response).map_err(internal_error)?))
}

// GET /hosters/:type/loadbalanced_block
//
// The path segment is a hoster type tag here, not an id. An unknown tag or
// an empty crawlable set both answer `{}` -- workers treat that as "sleep
// and ask again later".
async fn get_loadbalanced_block(
    State(state): State<Arc<AppState>>,
    Path(hoster_type): Path<String>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let Ok(kind) = hoster_type.parse::<HosterType>() else {
        warn!("loadbalanced block requested for unknown hoster type {hoster_type}");
        return Ok(Json(json!({})));
    };

    let hosters = state.registry.by_type(kind).await;
    let mut states = Vec::new();
    for hoster in &hosters {
        let status = state
            .manager
            .get_state_dict(&hoster.prefix())
            .await
            .map_err(internal_error)?;
        states.push((hoster.id, status));
    }

    let Some(chosen) = pick_stalest_crawlable(&states, now_ts()) else {
        warn!("no crawlable hosters of type {kind}");
        return Ok(Json(json!({})));
    };
    // chosen is one of the ids collected above
    let hoster = hosters
        .into_iter()
        .find(|h| h.id == chosen)
        .ok_or_else(|| internal_error("loadbalanced pick vanished from registry"))?;

    let response = issue_block(&state.manager, &state.metrics, &state.external_url, &hoster)
        .await
        .map_err(internal_error)?;
    Ok(Json(serde_json::to_value(response).map_err(internal_error)?))
}

// === Callback endpoints ===

// PUT /hosters/:hid/:block_uid
//
// Ingest the parsed repositories, then resolve the block against the
// hoster's run. Stale callbacks are acknowledged with 200 and no state
// change.
async fn add_repos(
    State(state): State<Arc<AppState>>,
    Path((hid, block_uid)): Path<(i64, String)>,
    Json(repo_dicts): Json<Vec<Value>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let hoster = state
        .registry
        .get(hid)
        .await
        .ok_or_else(|| error_body(StatusCode::NOT_FOUND, &format!("Hoster {hid} not found")))?;

    ingest(&state, &hoster, &repo_dicts).await?;

    state
        .metrics
        .callbacks_received
        .get_or_create(&HosterTypeLabel(hoster.kind.to_string()))
        .inc();

    let outcome = state
        .resolver
        .resolve_state(&hoster.prefix(), hoster.kind, &block_uid, &repo_dicts)
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))?;

    if outcome == Some(true) {
        state
            .metrics
            .runs_finished
            .get_or_create(&HosterTypeLabel(hoster.kind.to_string()))
            .inc();
        info!("run finished for hoster {}", hoster.id);
    }

    Ok(Json(json!({"status": "ok"})))
}

// PUT /hosters/:hid/
//
// Bulk ingest without a block uid: records are persisted but no state
// transition happens.
async fn add_repos_bulk(
    State(state): State<Arc<AppState>>,
    Path(hid): Path<i64>,
    Json(repo_dicts): Json<Vec<Value>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let hoster = state
        .registry
        .get(hid)
        .await
        .ok_or_else(|| error_body(StatusCode::NOT_FOUND, &format!("Hoster {hid} not found")))?;

    ingest(&state, &hoster, &repo_dicts).await?;
    Ok(Json(json!({"status": "ok"})))
}

async fn ingest(
    state: &AppState,
    hoster: &Hoster,
    repo_dicts: &[Value],
) -> Result<(), (StatusCode, Json<Value>)> {
    let stored = state
        .sink
        .store_repos(hoster, repo_dicts)
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))?;
    state.metrics.repos_ingested.inc_by(stored as u64);
    Ok(())
}
