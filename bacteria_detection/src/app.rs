use crate::{
    config::Config,
    pipeline::DetectionPipeline,
    server::{HttpServer, SharedState},
    state::ModelState,
    storage::TransientStorage,
    telemetry::Metrics,
    validation::FileValidator,
};
use std::sync::Arc;
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    tracing::info!("Initializing Bacteria Detection API");

    let model_config = config.model.clone();
    let model_state = tokio::task::spawn_blocking(move || ModelState::load(&model_config)).await?;
    if model_state.is_loaded() {
        tracing::info!("Model loaded successfully - API ready");
    } else {
        tracing::warn!("Model failed to load - detection requests will return 503");
    }

    let temp_dir = config.upload.get_temp_dir();
    std::fs::create_dir_all(&temp_dir)?;

    let pipeline = DetectionPipeline::new(
        model_state,
        FileValidator::new(&config.upload.allowed_extensions),
        TransientStorage::new(temp_dir),
    );
    let app_state = SharedState {
        pipeline: Arc::new(pipeline),
        metrics: Arc::new(Metrics::new()?),
    };

    let server = HttpServer::new(app_state, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
