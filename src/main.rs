//! Fraudgate service entrypoint.
//!
//! Bootstraps configuration, storage, the scoring engine and the HTTP
//! surface, then serves until shutdown.

use anyhow::{Context, Result};
use axum::{
    middleware as axum_mw,
    routing::{delete, get, post, put},
    Router,
};
use clap::Parser;
use dotenv::dotenv;
use fraudgate_backend::{
    api::{routes, AppState},
    auth,
    intake::IntakeService,
    middleware,
    ml::{features::DEFAULT_SEQUENCE_LENGTH, MlScorer},
    models::Config,
    scoring::{history::HistoryWindow, ScoringEngine},
    store::FraudStore,
    webhooks::WebhookRouter,
};
use std::{path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "fraudgate", about = "Real-time fraud-scoring gateway")]
struct Args {
    /// Listen port (overrides PORT).
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path (overrides DATABASE_PATH).
    #[arg(long)]
    database: Option<String>,

    /// Model artifact path (overrides MODEL_PATH).
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(model) = args.model {
        config.model_path = model;
    }

    info!("🛡️  Fraudgate starting");

    let store = Arc::new(
        FraudStore::new(&config.database_path)
            .with_context(|| format!("opening database at {}", config.database_path))?,
    );

    let ml = Arc::new(MlScorer::load(
        Path::new(&config.model_path),
        Duration::from_millis(config.ml_timeout_ms),
    ));
    let sequence_length = ml
        .loaded_sequence_length()
        .unwrap_or(DEFAULT_SEQUENCE_LENGTH);

    let history = Arc::new(HistoryWindow::new(store.clone()));
    let engine = Arc::new(ScoringEngine::new(
        store.clone(),
        history.clone(),
        ml.clone(),
        sequence_length,
    ));
    let intake = Arc::new(IntakeService::new(
        store.clone(),
        engine.clone(),
        history.clone(),
        Duration::from_millis(config.scoring_deadline_ms),
    ));

    if config.paystack_secret_key.is_none() {
        warn!("PAYSTACK_SECRET_KEY not set; Paystack webhooks disabled");
    }
    if config.flutterwave_webhook_hash.is_none() {
        warn!("FLUTTERWAVE_WEBHOOK_HASH not set; Flutterwave webhooks disabled");
    }
    let webhooks = Arc::new(WebhookRouter::new(
        store.clone(),
        intake.clone(),
        config.paystack_secret_key.clone(),
        config.flutterwave_webhook_hash.clone(),
    ));

    let state = AppState {
        store,
        intake,
        engine,
        ml,
        webhooks,
        config: config.clone(),
    };

    // Admin surface requires a bearer token with the admin permission.
    let admin_routes = Router::new()
        .route("/api/admin/users", get(routes::list_users))
        .route("/api/admin/analytics", get(routes::admin_analytics))
        .route(
            "/api/admin/fraud-rules",
            get(routes::list_rules).post(routes::create_rule),
        )
        .route(
            "/api/admin/fraud-rules/:id",
            put(routes::update_rule).delete(routes::delete_rule),
        )
        .route("/api/admin/transactions", delete(routes::purge_transactions))
        .route("/api/admin/model/reload", post(routes::reload_model))
        .route_layer(axum_mw::from_fn(auth::require_admin));

    let public_routes = Router::new()
        .route("/health", get(routes::health))
        .route(
            "/api/transactions",
            post(routes::submit_transaction).get(routes::list_transactions),
        )
        .route("/api/transactions/:id", get(routes::transaction_detail))
        .route("/api/users/:id/transactions", get(routes::user_transactions))
        .route("/api/stats", get(routes::stats))
        .route("/api/model/info", get(routes::model_info))
        .route("/api/webhooks/:provider", post(routes::webhook));

    let app = Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .layer(CorsLayer::permissive())
        .layer(axum_mw::from_fn(middleware::request_logging))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("🎯 API server listening on {addr}");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fraudgate_backend=debug,fraudgate=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents), then the manifest dir for
    // runs started from elsewhere with --manifest-path.
    let _ = dotenv();

    let manifest_dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidate = manifest_dir.join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}
