use std::{collections::BTreeMap, fs, io, path::Path};

use crate::error::ModelError;

/// Class index to label, as exported next to the trained weights.
#[derive(Debug, Clone)]
pub struct ClassMapping {
    labels: BTreeMap<usize, String>,
}

impl ClassMapping {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let raw = fs::read_to_string(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => ModelError::MappingMissing(path.to_path_buf()),
            _ => ModelError::Io(err),
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ModelError> {
        let by_key: BTreeMap<String, String> = serde_json::from_str(raw)?;
        let labels = by_key
            .into_iter()
            .map(|(key, label)| match key.trim().parse::<usize>() {
                Ok(index) => Ok((index, label)),
                Err(_) => Err(ModelError::InvalidClassIndex(key)),
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        if labels.is_empty() {
            return Err(ModelError::EmptyMapping);
        }
        Ok(ClassMapping { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn label(&self, index: usize) -> String {
        self.labels
            .get(&index)
            .cloned()
            .unwrap_or_else(|| format!("Unknown Index {index}"))
    }

    /// Labels in index order.
    pub fn names(&self) -> Vec<&str> {
        self.labels.values().map(String::as_str).collect()
    }
}
