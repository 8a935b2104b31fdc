use std::{env, path::PathBuf, str::FromStr};

use crate::error::ConfigError;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub body_limit_bytes: usize,
    pub image_dir: PathBuf,
    pub history_file: PathBuf,
    /// `None` leaves the history log unbounded.
    pub history_log_max_bytes: Option<u64>,
    pub model_path: PathBuf,
    pub class_mapping_path: PathBuf,
    pub input_op: String,
    pub output_op: String,
    pub input_size: u32,
    pub max_history_items: usize,
    pub model_url: Option<String>,
    pub class_mapping_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let body_limit_mb: usize = parse(&lookup, "BODY_LIMIT_MB", 5)?;
        let history_log_max_bytes: u64 = parse(&lookup, "HISTORY_LOG_MAX_BYTES", 10 * 1024 * 1024)?;

        let max_history_items: usize = parse(&lookup, "MAX_HISTORY_ITEMS", 10)?;
        if max_history_items == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_HISTORY_ITEMS",
                value: "0".into(),
            });
        }

        let input_size: u32 = parse(&lookup, "MODEL_INPUT_SIZE", 128)?;
        if input_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MODEL_INPUT_SIZE",
                value: "0".into(),
            });
        }

        Ok(Config {
            port: parse(&lookup, "PORT", 5000)?,
            body_limit_bytes: body_limit_mb * 1024 * 1024,
            image_dir: text("IMAGE_DIR", "static/images").into(),
            history_file: text("HISTORY_FILE", "prediction_history.txt").into(),
            history_log_max_bytes: (history_log_max_bytes > 0).then_some(history_log_max_bytes),
            model_path: text("MODEL_PATH", "./model/frozen_graph.pb").into(),
            class_mapping_path: text("CLASS_MAPPING_PATH", "./model/class_indices_mapping.json")
                .into(),
            input_op: text("MODEL_INPUT_OP", "x"),
            output_op: text("MODEL_OUTPUT_OP", "Identity"),
            input_size,
            max_history_items,
            model_url: lookup("MODEL_URL").filter(|url| !url.is_empty()),
            class_mapping_url: lookup("CLASS_MAPPING_URL").filter(|url| !url.is_empty()),
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}
