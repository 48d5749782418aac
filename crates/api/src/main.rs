mod config;
mod metrics;
mod retry;
mod routes;
mod store;

use anyhow::{Context, Result};
use clap::Parser;
use cypher::ScriptLoader;
use extract::{CompletionEngine, OllamaEngine};
use pipeline::{DocumentAnalyzer, GraphOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, OperationMode};
use crate::metrics::Metrics;
use crate::retry::RetryPolicy;
use crate::routes::AppState;
use crate::store::MemoryStore;

#[derive(Parser)]
#[command(name = "graphforge", about = "Turn documents into knowledge graphs, diagrams and Cypher scripts")]
struct Cli {
    /// TOML config file; its values override the mode preset
    #[arg(long, env = "GRAPHFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overrides `server.bind`
    #[arg(long, env = "GRAPHFORGE_BIND")]
    bind: Option<String>,

    #[arg(long, value_enum, default_value = "balanced", env = "GRAPHFORGE_MODE")]
    mode: OperationMode,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = AppConfig::load(cli.mode, cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    tracing::info!(mode = ?config.mode, model = %config.engine.model, "starting");

    // One engine for the whole process; nothing else starts until it is up
    let retry = RetryPolicy::from(&config.retry);
    let engine: Arc<dyn CompletionEngine> = Arc::new(
        retry
            .retry("engine initialization", || OllamaEngine::initialize(config.engine.clone()))
            .await
            .context("Failed to initialize completion engine")?,
    );

    let store = MemoryStore::new();
    if let Some(dir) = &config.documents_dir {
        store.load_directory(dir)?;
    }

    let loader = match &config.neo4j {
        Some(neo4j) => {
            let loader = retry
                .retry("neo4j connect", || ScriptLoader::connect(&neo4j.uri, &neo4j.user, &neo4j.password))
                .await?;
            Some(Arc::new(loader))
        }
        None => None,
    };

    let orchestrator =
        GraphOrchestrator::new(engine.clone(), config.pipeline.clone()).with_diagram_limits(config.diagram.clone());
    let analyzer = DocumentAnalyzer::new(engine.clone(), config.chunker.clone(), config.pipeline.clone());

    let state = AppState {
        engine: engine.clone(),
        orchestrator,
        analyzer: Arc::new(analyzer),
        store: Arc::new(store),
        metrics: Metrics::new(),
        compile: config.compile_options(),
        loader,
        event_buffer: config.server.event_buffer,
    };

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    tracing::info!("Server listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    engine.dispose().await;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
