use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::{
    error::{ApiError, ModelError},
    history_log::HistoryLog,
    ingest::{self, Recovered},
    predictor::{Outcome, Predictor, RankedClass},
};

const IMAGE_ROUTE: &str = "/static/images";

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub filename: String,
    pub uploaded_at: DateTime<Local>,
    pub prediction_text: String,
    pub outcome: Outcome,
}

/// Newest-first list of recent uploads, never longer than `cap`.
#[derive(Debug)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    cap: usize,
}

impl History {
    pub fn new(cap: usize) -> Self {
        History {
            entries: VecDeque::with_capacity(cap + 1),
            cap,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.cap);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }
}

/// The most recent upload. Replaced as a whole, never merged.
#[derive(Debug, Clone)]
pub struct Latest {
    pub prediction_text: String,
    pub filename: Option<String>,
    pub updated_at: Option<DateTime<Local>>,
    /// `None` until something has been classified, `Unready` if the model never loaded.
    pub outcome: Option<Outcome>,
}

#[derive(Debug)]
struct Ledger {
    last_number: u32,
    latest: Latest,
    history: History,
}

impl Ledger {
    /// `None` once the counter cannot advance without reusing a name.
    fn next_filename(&mut self) -> Option<String> {
        self.last_number = self.last_number.checked_add(1)?;
        Some(ingest::image_filename(self.last_number))
    }

    fn record(&mut self, filename: String, at: DateTime<Local>, outcome: Outcome) {
        let prediction_text = outcome.render();
        self.latest = Latest {
            prediction_text: prediction_text.clone(),
            filename: Some(filename.clone()),
            updated_at: Some(at),
            outcome: Some(outcome.clone()),
        };
        self.history.push(HistoryEntry {
            filename,
            uploaded_at: at,
            prediction_text,
            outcome,
        });
    }
}

#[derive(Debug, Serialize)]
pub struct LatestSnapshot {
    pub image_url: String,
    pub prediction: String,
    pub timestamp: f64,
    pub timestamp_formatted: String,
    pub filename: Option<String>,
    pub ready: bool,
}

#[derive(Debug, Serialize)]
pub struct HistoryItem {
    pub image_url: String,
    pub filename: String,
    pub timestamp_formatted: String,
    pub prediction: String,
    pub predictions: Vec<RankedClass>,
}

pub struct AppState {
    predictor: Option<Arc<Predictor>>,
    image_dir: PathBuf,
    history_log: HistoryLog,
    ledger: Mutex<Ledger>,
}

impl AppState {
    pub fn new(
        predictor: Result<Predictor, ModelError>,
        image_dir: impl Into<PathBuf>,
        history_log: HistoryLog,
        history_cap: usize,
        recovered: Recovered,
    ) -> Self {
        let (predictor, prediction_text, outcome) = match predictor {
            Ok(predictor) => (
                Some(Arc::new(predictor)),
                "Model ready. Waiting for an image to classify...".to_string(),
                None,
            ),
            Err(err) => (
                None,
                format!("ERROR: failed to load model: {err}"),
                Some(Outcome::Unready),
            ),
        };

        let (filename, updated_at) = recovered.last_image.unzip();

        AppState {
            predictor,
            image_dir: image_dir.into(),
            history_log,
            ledger: Mutex::new(Ledger {
                last_number: recovered.last_number,
                latest: Latest {
                    prediction_text,
                    filename,
                    updated_at,
                    outcome,
                },
                history: History::new(history_cap),
            }),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.predictor.is_some()
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    /// Persists, classifies and records one upload. The work runs on its own task so it
    /// completes even when the requesting client goes away, and the ledger stays locked
    /// for the whole cycle so concurrent uploads are applied one after another.
    pub async fn process_upload(
        self: Arc<Self>,
        bytes: Vec<u8>,
    ) -> Result<RankedClass, ApiError> {
        if !self.is_ready() {
            return Err(ApiError::ModelUnavailable);
        }
        tokio::spawn(async move { self.run_upload(&bytes).await })
            .await
            .unwrap_or_else(|err| {
                Err(ApiError::Processing(format!("upload task failed: {err}")))
            })
    }

    async fn run_upload(&self, bytes: &[u8]) -> Result<RankedClass, ApiError> {
        let predictor = self.predictor.clone().ok_or(ApiError::ModelUnavailable)?;

        let mut ledger = self.ledger.lock().await;
        let Some(filename) = ledger.next_filename() else {
            let reason = format!("image counter exhausted at {}", ledger.last_number);
            tracing::error!("{reason}");
            return Err(ApiError::Processing(reason));
        };

        let path = match ingest::store(&self.image_dir, &filename, bytes).await {
            Ok(path) => path,
            Err(err) => {
                let reason = format!("failed to save {filename}: {err}");
                tracing::error!("{reason}");
                self.history_log
                    .append(&filename, Local::now(), &Outcome::Failed(reason.clone()));
                return Err(ApiError::Processing(reason));
            }
        };
        tracing::info!(filename = %filename, bytes = bytes.len(), "New image received and saved");

        let outcome = tokio::task::spawn_blocking(move || predictor.predict(&path))
            .await
            .unwrap_or_else(|err| Outcome::Failed(format!("prediction task failed: {err}")));
        if let Outcome::Failed(reason) = &outcome {
            tracing::error!(filename = %filename, "Prediction failed: {reason}");
        }

        let at = Local::now();
        self.history_log.append(&filename, at, &outcome);
        ledger.record(filename, at, outcome.clone());
        tracing::debug!(history = ledger.history.len(), "Prediction recorded");

        match outcome {
            Outcome::Ready(ranking) => Ok(ranking.best().clone()),
            Outcome::Failed(reason) => Err(ApiError::Processing(reason)),
            Outcome::Unready => Err(ApiError::ModelUnavailable),
        }
    }

    pub async fn latest(&self) -> LatestSnapshot {
        let ledger = self.ledger.lock().await;
        let latest = &ledger.latest;

        let image_url = match (&latest.filename, latest.updated_at) {
            (Some(name), Some(at)) => image_url(name, at),
            (Some(name), None) => format!("{IMAGE_ROUTE}/{name}"),
            _ => String::new(),
        };

        LatestSnapshot {
            image_url,
            prediction: latest.prediction_text.clone(),
            timestamp: latest
                .updated_at
                .map(|at| at.timestamp_millis() as f64 / 1000.0)
                .unwrap_or(0.0),
            timestamp_formatted: latest
                .updated_at
                .map(format_time)
                .unwrap_or_else(|| "N/A".to_string()),
            filename: latest.filename.clone(),
            ready: self.is_ready(),
        }
    }

    pub async fn history(&self) -> Vec<HistoryItem> {
        let ledger = self.ledger.lock().await;
        ledger
            .history
            .iter()
            .map(|entry| HistoryItem {
                image_url: image_url(&entry.filename, entry.uploaded_at),
                filename: entry.filename.clone(),
                timestamp_formatted: format_time(entry.uploaded_at),
                prediction: entry.prediction_text.clone(),
                predictions: entry
                    .outcome
                    .ranking()
                    .map(|ranking| ranking.classes().to_vec())
                    .unwrap_or_default(),
            })
            .collect()
    }

    async fn best(&self) -> Option<RankedClass> {
        if !self.is_ready() {
            return None;
        }
        let ledger = self.ledger.lock().await;
        ledger
            .latest
            .outcome
            .as_ref()
            .and_then(Outcome::ranking)
            .map(|ranking| ranking.best().clone())
    }

    /// Bare class index for clients that cannot parse JSON; `-1` when there is none.
    pub async fn best_index_text(&self) -> String {
        match self.best().await {
            Some(best) => best.index.to_string(),
            None => "-1".to_string(),
        }
    }

    pub async fn best_score_text(&self) -> String {
        let score = self.best().await.map(|best| best.score).unwrap_or(0.0);
        format!("{score:.4}")
    }
}

fn image_url(filename: &str, at: DateTime<Local>) -> String {
    format!("{IMAGE_ROUTE}/{filename}?t={}", at.timestamp())
}

fn format_time(at: DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}
