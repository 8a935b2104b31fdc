use std::{
    fmt::Write as _,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};

use crate::predictor::Outcome;

const DELIMITER: &str = "------------------------------";

/// Append-only, human-readable record of every processed upload.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
    max_bytes: Option<u64>,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>, max_bytes: Option<u64>) -> Self {
        HistoryLog {
            path: path.into(),
            max_bytes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rotated_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".1");
        PathBuf::from(name)
    }

    /// Writes one entry. Errors are reported to the console and otherwise dropped.
    pub fn append(&self, filename: &str, at: DateTime<Local>, outcome: &Outcome) {
        let entry = render_entry(filename, at, outcome);
        if let Err(err) = self.try_append(&entry) {
            tracing::error!(path = %self.path.display(), "failed to write prediction history: {err}");
        }
    }

    fn try_append(&self, entry: &str) -> io::Result<()> {
        if let Some(max_bytes) = self.max_bytes {
            let current = match fs::metadata(&self.path) {
                Ok(meta) => meta.len(),
                Err(err) if err.kind() == io::ErrorKind::NotFound => 0,
                Err(err) => return Err(err),
            };
            if current > 0 && current + entry.len() as u64 > max_bytes {
                let rotated = self.rotated_path();
                fs::rename(&self.path, &rotated)?;
                tracing::info!("Rotated prediction history to {}", rotated.display());
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(entry.as_bytes())
    }
}

pub fn render_entry(filename: &str, at: DateTime<Local>, outcome: &Outcome) -> String {
    let mut entry = format!("[{}] File: {filename}\n", at.format("%Y-%m-%d %H:%M:%S"));

    match outcome {
        Outcome::Ready(ranking) => {
            let best = ranking.best();
            let _ = writeln!(entry, "    Best Prediction Index: {}", best.index);
            let _ = writeln!(entry, "    Best Prediction Score: {:.4}", best.score);
            entry.push_str("    Predictions:\n");
            for (rank, class) in ranking.classes().iter().enumerate() {
                let _ = writeln!(
                    entry,
                    "      - Top {} (Index {}): {} (Score: {:.4})",
                    rank + 1,
                    class.index,
                    class.label,
                    class.score
                );
            }
        }
        Outcome::Unready => {
            entry.push_str("    Prediction: failed or model unavailable.\n");
        }
        Outcome::Failed(reason) => {
            let _ = writeln!(entry, "    Detail/Error: {reason}");
        }
    }

    entry.push_str(DELIMITER);
    entry.push('\n');
    entry
}
