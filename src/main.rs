use std::{net::SocketAddr, sync::Arc};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod error;
mod history_log;
mod ingest;
mod labels;
mod model;
mod predictor;
mod routes;
mod state;
mod utils;

use config::Config;
use history_log::HistoryLog;
use predictor::load_predictor;
use state::AppState;
use utils::ensure_files_exist;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    if !config.image_dir.exists() {
        tokio::fs::create_dir_all(&config.image_dir).await?;
        tracing::info!("Created upload directory {}", config.image_dir.display());
    }

    let recovered = match ingest::recover(&config.image_dir) {
        Ok(recovered) => recovered,
        Err(err) => {
            tracing::warn!("Could not scan {}: {err}", config.image_dir.display());
            Default::default()
        }
    };
    match &recovered.last_image {
        Some((name, at)) => tracing::info!(
            "Last upload found: {name} ({}), numbering continues from {}",
            at.format("%Y-%m-%d %H:%M:%S"),
            recovered.last_number + 1
        ),
        None if recovered.last_number > 0 => tracing::info!(
            "Numbering continues from {}",
            recovered.last_number + 1
        ),
        None => tracing::info!("No previous images found in the upload directory"),
    }

    ensure_files_exist(&config).await;

    let predictor = load_predictor(&config);
    match &predictor {
        Ok(predictor) => tracing::info!(
            classes = predictor.class_count(),
            "Model ready, waiting for images"
        ),
        Err(err) => tracing::error!("Model unavailable, uploads will be refused: {err}"),
    }

    let history_log = HistoryLog::new(&config.history_file, config.history_log_max_bytes);
    tracing::info!("Prediction history is appended to {}", history_log.path().display());
    let state = AppState::new(
        predictor,
        &config.image_dir,
        history_log,
        config.max_history_items,
        recovered,
    );

    let app = routes::router(Arc::new(state), config.body_limit_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
