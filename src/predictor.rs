use std::{cmp::Ordering, fmt::Write as _, path::Path};

use serde::Serialize;

use crate::{
    config::Config,
    error::ModelError,
    labels::ClassMapping,
    model::{preprocess, Classifier, TfClassifier},
};

pub const TOP_K: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedClass {
    pub index: usize,
    pub label: String,
    pub score: f32,
}

/// Best-first classes for one image. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    classes: Vec<RankedClass>,
}

impl Ranking {
    pub fn best(&self) -> &RankedClass {
        &self.classes[0]
    }

    pub fn classes(&self) -> &[RankedClass] {
        &self.classes
    }

    pub fn render(&self) -> String {
        let mut text = String::from("Prediction:");
        for (rank, class) in self.classes.iter().enumerate() {
            let _ = write!(text, "\n{}. {} ({:.4})", rank + 1, class.label, class.score);
        }
        text
    }
}

/// Result of one classification attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ready(Ranking),
    Unready,
    Failed(String),
}

impl Outcome {
    pub fn render(&self) -> String {
        match self {
            Outcome::Ready(ranking) => ranking.render(),
            Outcome::Unready => "ML model unavailable or class mapping failed to load.".into(),
            Outcome::Failed(reason) => format!("ERROR: {reason}"),
        }
    }

    pub fn ranking(&self) -> Option<&Ranking> {
        match self {
            Outcome::Ready(ranking) => Some(ranking),
            _ => None,
        }
    }
}

/// Picks the `k` highest scores, best first. Equal scores keep index order, though
/// callers should not rely on how ties are broken.
pub fn rank(scores: &[f32], mapping: &ClassMapping, k: usize) -> Option<Ranking> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(Ordering::Equal)
    });
    order.truncate(k);

    let classes: Vec<RankedClass> = order
        .into_iter()
        .map(|index| RankedClass {
            index,
            label: mapping.label(index),
            score: scores[index],
        })
        .collect();

    (!classes.is_empty()).then_some(Ranking { classes })
}

pub struct Predictor {
    classifier: Box<dyn Classifier>,
    mapping: ClassMapping,
}

impl Predictor {
    pub fn new(classifier: Box<dyn Classifier>, mapping: ClassMapping) -> Result<Self, ModelError> {
        // A loaded mapping is never empty, so equal counts also rule out zero classes.
        if classifier.class_count() != mapping.len() {
            return Err(ModelError::Topology(format!(
                "classifier has {} classes but the mapping has {}",
                classifier.class_count(),
                mapping.len()
            )));
        }
        Ok(Predictor {
            classifier,
            mapping,
        })
    }

    pub fn class_count(&self) -> usize {
        self.mapping.len()
    }

    /// Classifies an image that is already on disk. Failures come back as `Outcome::Failed`.
    pub fn predict(&self, image_path: &Path) -> Outcome {
        let scores = preprocess(image_path, self.classifier.input_size())
            .and_then(|input| self.classifier.infer(&input));

        match scores {
            Ok(scores) => match rank(&scores, &self.mapping, TOP_K) {
                Some(ranking) => Outcome::Ready(ranking),
                None => Outcome::Failed("model returned no scores".into()),
            },
            Err(err) => Outcome::Failed(err.to_string()),
        }
    }
}

/// Loads the class mapping and the frozen graph named by `config`.
pub fn load_predictor(config: &Config) -> Result<Predictor, ModelError> {
    tracing::info!("Loading class mapping from {}", config.class_mapping_path.display());
    let mapping = ClassMapping::load(&config.class_mapping_path)?;
    tracing::info!(
        classes = mapping.len(),
        "Class mapping loaded, labels by index: {:?}",
        mapping.names()
    );

    tracing::info!("Loading model graph from {}", config.model_path.display());
    let classifier = TfClassifier::load(
        &config.model_path,
        &config.input_op,
        &config.output_op,
        config.input_size,
        mapping.len(),
    )?;

    Predictor::new(Box::new(classifier), mapping)
}
