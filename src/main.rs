use std::str::FromStr;
use std::sync::Arc;

use onboardly::api::{ApiState, api_routes};
use onboardly::config::{EngineConfig, ServerConfig};
use onboardly::engine::{FlowEngine, spawn_cron_ticker};
use onboardly::notify::ChannelRouter;
use onboardly::store::{LibSqlBackend, Store};
use onboardly::webhook::{HttpWebhookNotifier, WebhookSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServerConfig::from_env()?;

    eprintln!("📬 Onboardly v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api", config.port);
    eprintln!("   Cron: {}", config.cron_schedule);

    // ── Database ─────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.db_path);
    let store: Arc<dyn Store> = Arc::new(
        LibSqlBackend::new_local(db_path).await.unwrap_or_else(|e| {
            eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
            std::process::exit(1);
        }),
    );
    eprintln!("   Database: {}", config.db_path);

    // ── Engine ───────────────────────────────────────────────────────
    let sender = Arc::new(ChannelRouter::from_env());
    let webhooks: Arc<dyn WebhookSink> = Arc::new(HttpWebhookNotifier::new(store.clone()));
    let engine = Arc::new(FlowEngine::new(
        store.clone(),
        sender,
        webhooks.clone(),
        EngineConfig::default(),
    ));

    // Spawn the scheduled pass ticker
    let schedule = cron::Schedule::from_str(&config.cron_schedule)?;
    let _cron_handle = spawn_cron_ticker(engine.clone(), schedule, config.tick_interval);

    // ── API server ───────────────────────────────────────────────────
    let app = api_routes(ApiState {
        store,
        engine,
        webhooks,
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "API server started");
    axum::serve(listener, app).await?;

    Ok(())
}
