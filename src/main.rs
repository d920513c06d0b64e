use anyhow::{Context, Result};
use clap::Parser;
use loqa_live::{
    create_router, AppState, Config, Engines, NatsClient, PipelineSettings, SessionController,
};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "loqa-live", version, about = "Real-time speech translation sessions")]
struct Args {
    /// Configuration file, without extension
    #[arg(long, default_value = "config/loqa-live")]
    config: String,

    /// Override service.http.port
    #[arg(long)]
    port: Option<u16>,

    /// Override service.http.bind
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }
    if let Some(bind) = args.bind {
        cfg.service.http.bind = bind;
    }

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    let engines = Engines::from_config(&cfg.engine).context("Failed to set up engines")?;

    let nats = if cfg.nats.url.is_empty() {
        info!("NATS export disabled");
        None
    } else {
        Some(NatsClient::connect(&cfg.nats.url, &cfg.nats.subject_prefix).await?)
    };

    let controller = SessionController::new(engines, PipelineSettings::from_config(&cfg), nats);
    let sweeper = controller.spawn_sweeper();

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let shutdown_timeout = Duration::from_secs(cfg.service.shutdown_timeout_secs);
    let app = create_router(AppState::new(controller.clone(), cfg.service));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("HTTP server listening on http://{}", addr);

    let stopping = Arc::new(Notify::new());
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let controller = controller.clone();
        let stopping = Arc::clone(&stopping);
        async move {
            shutdown_signal().await;
            controller.shutdown_all();
            stopping.notify_one();
        }
    });

    tokio::select! {
        result = server.into_future() => result.context("HTTP server failed")?,
        _ = async {
            stopping.notified().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            warn!("Shutdown timeout reached, closing remaining connections");
        }
    }

    sweeper.abort();
    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
