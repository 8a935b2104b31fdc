use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap},
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::services::ServeDir;

use crate::{
    error::ApiError,
    ingest::EXPECTED_CONTENT_TYPE,
    state::{AppState, HistoryItem, LatestSnapshot},
};

const INDEX_HTML: &str = include_str!("../static/index.html");
const SCRIPT_JS: &str = include_str!("../static/script.js");

pub fn router(state: Arc<AppState>, body_limit_bytes: usize) -> Router {
    let images = ServeDir::new(state.image_dir());

    Router::new()
        .route("/", get(index))
        .route("/static/script.js", get(script))
        .route("/upload", post(upload_handler))
        .route("/latest_data", get(latest_data))
        .route("/history_data", get(history_data))
        .route("/arduino_best_prediction", get(best_index))
        .route("/esp32_best_score", get(best_score))
        .route("/health", get(health_check))
        .nest_service("/static/images", images)
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .with_state(state)
}

async fn upload_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    if !state.is_ready() {
        tracing::warn!("Upload rejected: model is not ready");
        return Err(ApiError::ModelUnavailable);
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    if content_type != Some(EXPECTED_CONTENT_TYPE) {
        tracing::warn!("Upload rejected: unexpected Content-Type {:?}", content_type);
        return Err(ApiError::UnsupportedMediaType);
    }

    if body.is_empty() {
        tracing::warn!("Upload rejected: empty body");
        return Err(ApiError::EmptyBody);
    }

    let best = state.process_upload(body.to_vec()).await?;

    Ok(Json(json!({
        "status": "success",
        "message": "Image received and processed.",
        "index": best.index,
        "score": format!("{:.4}", best.score),
    })))
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn script() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript")], SCRIPT_JS)
}

async fn latest_data(State(state): State<Arc<AppState>>) -> Json<LatestSnapshot> {
    Json(state.latest().await)
}

async fn history_data(State(state): State<Arc<AppState>>) -> Json<Vec<HistoryItem>> {
    Json(state.history().await)
}

async fn best_index(State(state): State<Arc<AppState>>) -> String {
    state.best_index_text().await
}

async fn best_score(State(state): State<Arc<AppState>>) -> String {
    state.best_score_text().await
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "status": "OK", "model_ready": state.is_ready() }))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        response::Response,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        error::ModelError,
        history_log::HistoryLog,
        ingest,
        labels::ClassMapping,
        model::testing::{sample_jpeg, FixedScores},
        predictor::Predictor,
    };

    fn app(dir: &Path, ready: bool) -> Router {
        let predictor = if ready {
            let mapping = ClassMapping::from_json(r#"{"0":"aspirin","1":"ibuprofen"}"#).unwrap();
            Predictor::new(Box::new(FixedScores::new(vec![0.7, 0.3])), mapping)
        } else {
            Err(ModelError::GraphMissing(dir.join("frozen_graph.pb")))
        };
        let images = dir.join("images");
        std::fs::create_dir_all(&images).unwrap();
        let recovered = ingest::recover(&images).unwrap();
        let state = AppState::new(
            predictor,
            images,
            HistoryLog::new(dir.join("history.txt"), None),
            10,
            recovered,
        );
        router(Arc::new(state), 5 * 1024 * 1024)
    }

    async fn upload(app: &Router, content_type: &str, body: Vec<u8>) -> Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    async fn get_text(app: &Router, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn get_json(app: &Router, uri: &str) -> Value {
        let (status, text) = get_text(app, uri).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_str(&text).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn upload_reports_best_class() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), true);

        let response = upload(&app, "image/jpeg", sample_jpeg()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["index"], 0);
        assert_eq!(body["score"], "0.7000");

        assert_eq!(get_text(&app, "/arduino_best_prediction").await.1, "0");
        assert_eq!(get_text(&app, "/esp32_best_score").await.1, "0.7000");

        let latest = get_json(&app, "/latest_data").await;
        assert_eq!(latest["filename"], "image_0001.jpg");
        assert_eq!(latest["ready"], true);

        let history = get_json(&app, "/history_data").await;
        assert_eq!(history[0]["predictions"][0]["label"], "aspirin");
        assert_eq!(history[0]["predictions"][0]["index"], 0);
    }

    #[tokio::test]
    async fn stored_images_are_served() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), true);
        let jpeg = sample_jpeg();
        upload(&app, "image/jpeg", jpeg.clone()).await;

        let request = Request::builder()
            .uri("/static/images/image_0001.jpg")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(bytes.to_vec(), jpeg);
    }

    #[tokio::test]
    async fn wrong_content_type_is_rejected_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), true);

        let response = upload(&app, "image/png", sample_jpeg()).await;
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let body = json_body(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["index"], -1);

        let latest = get_json(&app, "/latest_data").await;
        assert!(latest["filename"].is_null());
        assert_eq!(latest["image_url"], "");
        assert_eq!(latest["timestamp_formatted"], "N/A");
        assert_eq!(get_json(&app, "/history_data").await, json!([]));
        assert!(!dir.path().join("images/image_0001.jpg").exists());
    }

    #[tokio::test]
    async fn empty_body_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), true);

        let response = upload(&app, "image/jpeg", Vec::new()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(get_json(&app, "/history_data").await, json!([]));
        assert_eq!(get_text(&app, "/arduino_best_prediction").await.1, "-1");
    }

    #[tokio::test]
    async fn corrupt_upload_is_a_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), true);

        let response = upload(&app, "image/jpeg", b"garbage".to_vec()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(body["message"]
            .as_str()
            .unwrap()
            .starts_with("Image received, but processing failed"));

        let history = get_json(&app, "/history_data").await;
        assert_eq!(history.as_array().unwrap().len(), 1);
        assert_eq!(history[0]["predictions"], json!([]));
    }

    #[tokio::test]
    async fn unready_model_answers_every_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), false);

        let response = upload(&app, "image/jpeg", sample_jpeg()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["message"], "Model not ready for prediction.");

        assert_eq!(
            get_text(&app, "/arduino_best_prediction").await,
            (StatusCode::OK, "-1".to_string())
        );
        assert_eq!(
            get_text(&app, "/esp32_best_score").await,
            (StatusCode::OK, "0.0000".to_string())
        );

        let latest = get_json(&app, "/latest_data").await;
        assert_eq!(latest["ready"], false);
        assert!(latest["prediction"].as_str().unwrap().contains("model file not found"));

        assert_eq!(get_json(&app, "/health").await["model_ready"], false);
    }

    #[tokio::test]
    async fn history_is_capped_at_ten() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), true);

        for _ in 0..11 {
            let response = upload(&app, "image/jpeg", sample_jpeg()).await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let history = get_json(&app, "/history_data").await;
        let names: Vec<&str> = history
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["filename"].as_str().unwrap())
            .collect();
        assert_eq!(names.len(), 10);
        assert_eq!(names[0], "image_0011.jpg");
        assert_eq!(names[9], "image_0002.jpg");
    }

    #[tokio::test]
    async fn restart_continues_numbering() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir_all(&images).unwrap();
        for n in 1..=4 {
            std::fs::write(images.join(ingest::image_filename(n)), sample_jpeg()).unwrap();
        }

        let app = app(dir.path(), true);
        let latest = get_json(&app, "/latest_data").await;
        assert_eq!(latest["filename"], "image_0004.jpg");

        upload(&app, "image/jpeg", sample_jpeg()).await;
        let latest = get_json(&app, "/latest_data").await;
        assert_eq!(latest["filename"], "image_0005.jpg");
        assert!(images.join("image_0005.jpg").exists());
    }

    #[tokio::test]
    async fn dashboard_is_served() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), false);

        let (status, html) = get_text(&app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("/static/script.js"));

        let (status, script) = get_text(&app, "/static/script.js").await;
        assert_eq!(status, StatusCode::OK);
        assert!(script.contains("/latest_data"));
    }
}
