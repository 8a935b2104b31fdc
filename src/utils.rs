use std::{env, path::Path};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};

use crate::{config::Config, error::DownloadError};

async fn download_file(url: &str, path: &Path) -> Result<(), DownloadError> {
    tracing::info!("Downloading {} from {}", path.display(), url);

    let mut header_map = HeaderMap::new();
    if let Ok(token) = env::var("GITHUB_TOKEN") {
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| DownloadError::InvalidToken)?;
        header_map.insert(AUTHORIZATION, auth_value);
    }
    header_map.insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));

    let client = reqwest::Client::new();
    let response = client.get(url).headers(header_map).send().await?;
    if !response.status().is_success() {
        return Err(DownloadError::Status(response.status()));
    }

    let bytes = response.bytes().await?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

/// Fetches missing model artifacts when a source URL is configured. A failed download
/// only leaves the model unready.
pub async fn ensure_files_exist(config: &Config) {
    let artifacts = [
        (&config.model_path, &config.model_url),
        (&config.class_mapping_path, &config.class_mapping_url),
    ];

    for (path, url) in artifacts {
        if path.exists() {
            continue;
        }
        let Some(url) = url else {
            tracing::debug!("{} is missing and no download URL is set", path.display());
            continue;
        };
        if let Err(err) = download_file(url, path).await {
            tracing::error!("Failed to download {}: {err}", path.display());
        }
    }
}
