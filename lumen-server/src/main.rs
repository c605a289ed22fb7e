//! Lumen server: streams SDXL denoising previews over WebSocket.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lumen_runtime::PipelinePool;
use lumen_server::api::{self, AppState};
use lumen_server::config::{reference_pipelines, ServeArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = ServeArgs::parse();

    // --- Load config ---
    let config = args.pipeline_config()?;
    info!(
        "Model config: {}, {} latent channels, default {}px, scheduler {:?}",
        config.model.name,
        config.model.latent_channels,
        config.model.default_resolution(),
        config.scheduler.kind,
    );

    // --- Build replicas ---
    let pipelines = reference_pipelines(&config, args.replicas, args.watermark)?;
    let pool = PipelinePool::new(pipelines);
    info!("{} pipeline replica(s) ready", pool.size());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine_id = args
        .engine_id
        .clone()
        .unwrap_or_else(|| config.model.name.clone());
    let state = Arc::new(AppState {
        engine_id: engine_id.clone(),
        model: config.model,
        pool: pool.clone(),
        session: args.session_config(),
        shutdown: shutdown_rx,
    });

    // --- Start server ---
    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Lumen serving '{engine_id}' on {addr}");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested, cancelling running sessions");
            }
            let _ = shutdown_tx.send(true);
            pool.close();
        })
        .await?;

    Ok(())
}
