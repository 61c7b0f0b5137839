//! Model resources and loading.
//!
//! A model named `Foo` lives in the resources directory as `Foo.onnx` with
//! its class labels in `Foo.labels`, one per line.

use crate::error::SetupError;
use crate::inference::Classifier;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extension of the model file.
pub const MODEL_EXTENSION: &str = "onnx";
/// Extension of the labels file.
pub const LABELS_EXTENSION: &str = "labels";

/// A located model and its labels file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResource {
    name: String,
    model_path: PathBuf,
    labels_path: PathBuf,
}

impl ModelResource {
    /// Find model `name` inside `dir`.
    ///
    /// Both the model and the labels file must exist.
    pub fn locate(dir: &Path, name: &str) -> Result<Self, SetupError> {
        let model_path = dir.join(format!("{name}.{MODEL_EXTENSION}"));
        let labels_path = dir.join(format!("{name}.{LABELS_EXTENSION}"));
        if !model_path.is_file() || !labels_path.is_file() {
            return Err(SetupError::ModelMissing {
                name: name.to_owned(),
                dir: dir.to_path_buf(),
            });
        }
        Ok(Self {
            name: name.to_owned(),
            model_path,
            labels_path,
        })
    }

    /// Model name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the model file.
    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Read the class labels, skipping blank lines.
    pub fn labels(&self) -> Result<Vec<String>, SetupError> {
        let text = std::fs::read_to_string(&self.labels_path).map_err(|err| SetupError::ModelLoad {
            name: self.name.clone(),
            reason: format!("cannot read labels: {err}"),
        })?;
        let labels: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        if labels.is_empty() {
            return Err(SetupError::ModelLoad {
                name: self.name.clone(),
                reason: "labels file is empty".to_owned(),
            });
        }
        Ok(labels)
    }
}

/// Turns a located resource into a classifier.
pub trait ModelLoader: Send + Sync {
    /// Load the model. Failures are [`SetupError::ModelLoad`].
    fn load(&self, resource: &ModelResource) -> Result<Arc<dyn Classifier>, SetupError>;
}

/// Softmax over raw scores, stable for large logits.
#[must_use]
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|score| (score - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return vec![0.0; scores.len()];
    }
    exps.into_iter().map(|value| value / sum).collect()
}
