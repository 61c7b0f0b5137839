//! ONNX Runtime classifier backend.

use crate::config::ModelConfig;
use crate::error::{InferenceError, SetupError};
use crate::inference::{Classifier, Observation, OrientedImage};
use crate::model::{softmax, ModelLoader, ModelResource};
use ort::session::Session;
use ort::value::{Tensor, Value};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Input tensor and output interpretation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnnxSettings {
    /// Name of the image input.
    pub input_name: String,
    /// Side of the square NCHW input.
    pub input_size: u32,
    /// Whether the output is raw logits.
    pub apply_softmax: bool,
}

impl From<&ModelConfig> for OnnxSettings {
    fn from(config: &ModelConfig) -> Self {
        Self {
            input_name: config.input_name.clone(),
            input_size: config.input_size.max(1),
            apply_softmax: config.apply_softmax,
        }
    }
}

/// Image classifier backed by an ONNX model.
///
/// Expects one `[1, 3, N, N]` float input in [0, 1] RGB order and a single
/// score per label as output.
pub struct OnnxClassifier {
    name: String,
    session: Mutex<Session>,
    labels: Vec<String>,
    settings: OnnxSettings,
}

impl OnnxClassifier {
    /// Load the model and labels of `resource`.
    pub fn load(resource: &ModelResource, settings: OnnxSettings) -> Result<Self, SetupError> {
        let load_error = |reason: String| SetupError::ModelLoad {
            name: resource.name().to_owned(),
            reason,
        };

        let labels = resource.labels()?;
        let session = Session::builder()
            .map_err(|err| load_error(format!("failed to create session builder: {err}")))?
            .commit_from_file(resource.model_path())
            .map_err(|err| load_error(err.to_string()))?;

        info!(
            model = resource.name(),
            labels = labels.len(),
            input = %settings.input_name,
            size = settings.input_size,
            "classifier loaded"
        );
        Ok(Self {
            name: resource.name().to_owned(),
            session: Mutex::new(session),
            labels,
            settings,
        })
    }

    fn failure<E: std::fmt::Display>(&self, reason: E) -> InferenceError {
        InferenceError::Failed {
            classifier: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    /// Nearest-neighbour resize into planar RGB.
    fn preprocess(&self, image: &OrientedImage<'_>) -> Result<Vec<f32>, InferenceError> {
        let size = self.settings.input_size;
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(InferenceError::EmptyImage { width, height });
        }

        let plane = usize::try_from(u64::from(size) * u64::from(size))
            .map_err(|err| self.failure(err))?;
        let mut red = Vec::with_capacity(plane * 3);
        let mut green = Vec::with_capacity(plane);
        let mut blue = Vec::with_capacity(plane);

        for y in 0..size {
            let src_y = scale(y, height, size);
            for x in 0..size {
                let src_x = scale(x, width, size);
                let (r, g, b) = image.rgb_at(src_x, src_y).ok_or_else(|| {
                    self.failure(format!("pixel ({src_x}, {src_y}) out of bounds"))
                })?;
                red.push(f32::from(r) / 255.0);
                green.push(f32::from(g) / 255.0);
                blue.push(f32::from(b) / 255.0);
            }
        }

        red.extend(green);
        red.extend(blue);
        Ok(red)
    }

    fn run(&self, input: Vec<f32>) -> Result<Vec<f32>, InferenceError> {
        let side = usize::try_from(self.settings.input_size).map_err(|err| self.failure(err))?;
        let tensor = Tensor::from_array((vec![1usize, 3, side, side], input.into_boxed_slice()))
            .map(Value::from)
            .map_err(|err| self.failure(err))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| self.failure("session lock poisoned"))?;
        let outputs = session
            .run(ort::inputs![self.settings.input_name.as_str() => tensor])
            .map_err(|err| self.failure(err))?;
        let first = outputs
            .iter()
            .next()
            .ok_or_else(|| self.failure("model produced no outputs"))?
            .1;
        let (_shape, data) = first
            .try_extract_tensor::<f32>()
            .map_err(|err| self.failure(err))?;
        let scores = data.to_vec();
        Ok(scores)
    }
}

impl Classifier for OnnxClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn classify(&self, image: &OrientedImage<'_>) -> Result<Vec<Observation>, InferenceError> {
        let input = self.preprocess(image)?;
        let raw = self.run(input)?;
        if raw.len() != self.labels.len() {
            warn!(
                outputs = raw.len(),
                labels = self.labels.len(),
                "model output does not match label count"
            );
        }

        let scores = if self.settings.apply_softmax {
            softmax(&raw)
        } else {
            raw
        };
        let mut observations: Vec<(String, f32)> = self
            .labels
            .iter()
            .cloned()
            .zip(scores)
            .collect();
        observations.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(observations
            .into_iter()
            .map(|(label, confidence)| Observation::classification(label, confidence))
            .collect())
    }
}

/// Loads [`OnnxClassifier`]s with fixed settings.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    settings: OnnxSettings,
}

impl OnnxLoader {
    /// Loader using the input settings of `config`.
    #[must_use]
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            settings: OnnxSettings::from(config),
        }
    }
}

impl ModelLoader for OnnxLoader {
    fn load(&self, resource: &ModelResource) -> Result<Arc<dyn Classifier>, SetupError> {
        let classifier = OnnxClassifier::load(resource, self.settings.clone())?;
        Ok(Arc::new(classifier))
    }
}

/// Map a destination coordinate back onto a source axis of length `src`.
fn scale(coord: u32, src: u32, dst: u32) -> u32 {
    let mapped = u64::from(coord) * u64::from(src) / u64::from(dst.max(1));
    u32::try_from(mapped).map_or(src - 1, |value| value.min(src - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_maps_into_source() {
        assert_eq!(scale(0, 640, 224), 0);
        assert_eq!(scale(223, 640, 224), 637);
        assert_eq!(scale(3, 2, 4), 1);
    }

    #[test]
    fn test_settings_from_config() {
        let config = ModelConfig {
            input_size: 0,
            ..ModelConfig::default()
        };
        let settings = OnnxSettings::from(&config);
        assert_eq!(settings.input_size, 1);
        assert_eq!(settings.input_name, "input");
    }

    #[test]
    fn test_corrupt_model_fails_to_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("Broken.onnx"), b"not a model").expect("write model");
        std::fs::write(dir.path().join("Broken.labels"), "car\n").expect("write labels");

        let resource = ModelResource::locate(dir.path(), "Broken").expect("resource exists");
        let result = OnnxLoader::new(&ModelConfig::default()).load(&resource);
        assert!(matches!(result, Err(SetupError::ModelLoad { .. })));
    }
}
