//! jdfit HTTP server
//!
//! Scores how well a résumé covers the requirements of a job description.
//!
//! # Usage
//! ```bash
//! jdfit-server [--host 0.0.0.0] [--port 8000] [--config jdfit.json] [--verbose]
//! ```

mod routes;

use anyhow::{Context, Result};
use clap::Parser;
use jdfit::embeddings::download::{ensure_minilm_model, MINILM_DIR};
use jdfit::{AlignConfig, AlignmentEngine};
use std::path::PathBuf;

/// Résumé / job description alignment service
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host to bind to
    #[arg(long, env = "JDFIT_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "JDFIT_PORT", default_value = "8000")]
    port: u16,

    /// JSON config file; missing fields take their defaults
    #[arg(short, long, env = "JDFIT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Never fetch the embedding model, fail if it is not on disk
    #[arg(long)]
    no_download: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(args.verbose)
        .init();

    let config = match &args.config {
        Some(path) => AlignConfig::from_file(path).map_err(anyhow::Error::msg)?,
        None => AlignConfig::default(),
    };

    if config.embedding.auto_download && !args.no_download {
        if config.embedding.model_name == MINILM_DIR {
            ensure_minilm_model(&config.embedding.model_dir)
                .await
                .context("Failed to fetch embedding model")?;
        } else {
            tracing::warn!(
                model = %config.embedding.model_name,
                "Auto-download only supports {}, expecting model on disk",
                MINILM_DIR
            );
        }
    }

    let engine = tokio::task::spawn_blocking({
        let config = config.clone();
        move || AlignmentEngine::from_config(&config)
    })
    .await
    .context("Model loading task failed")??;

    let app = routes::router(routes::AppState::new(engine));

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", args.host, args.port))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        threshold = config.matching.match_threshold,
        "jdfit server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
