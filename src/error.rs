use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Anything that keeps the classifier from becoming ready at startup.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("class mapping file not found ({0})")]
    MappingMissing(PathBuf),
    #[error("class mapping is malformed: {0}")]
    MappingMalformed(#[from] serde_json::Error),
    #[error("class mapping key {0:?} is not an integer index")]
    InvalidClassIndex(String),
    #[error("class mapping is empty")]
    EmptyMapping,
    #[error("model file not found ({0})")]
    GraphMissing(PathBuf),
    #[error("failed to read model file: {0}")]
    Io(#[from] std::io::Error),
    #[error("tensorflow: {0}")]
    Tensorflow(#[from] tensorflow::Status),
    #[error("operation {0:?} not found in graph")]
    MissingOperation(String),
    #[error("model topology mismatch: {0}")]
    Topology(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("image file not found for prediction ({0})")]
    NotFound(PathBuf),
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("inference failed: {0}")]
    Inference(String),
}

impl From<tensorflow::Status> for PredictError {
    fn from(status: tensorflow::Status) -> Self {
        PredictError::Inference(status.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server answered {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid GITHUB_TOKEN header value")]
    InvalidToken,
    #[error("failed to write file: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to HTTP clients by the upload endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Model not ready for prediction.")]
    ModelUnavailable,
    #[error("Invalid Content-Type. Expected image/jpeg.")]
    UnsupportedMediaType,
    #[error("No image data received.")]
    EmptyBody,
    #[error("Image received, but processing failed: {0}")]
    Processing(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::EmptyBody => StatusCode::BAD_REQUEST,
            ApiError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "status": "error",
            "message": self.to_string(),
            "index": -1,
            "score": 0.0,
        }));
        (self.status(), body).into_response()
    }
}
