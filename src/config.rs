//! Application configuration loaded from TOML.

use crate::error::ConfigError;
use crate::gate::ConfidenceGate;
use crate::permission::DenialMode;
use crate::session::SessionPreset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Camera and capture session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// V4L2 device index; `None` picks the first capture-capable node.
    pub device: Option<u32>,
    /// Capture resolution preset.
    pub preset: SessionPreset,
    /// Number of driver buffers.
    pub buffer_count: u32,
    /// Drop frames that arrive while the previous one is still queued.
    pub discard_late_frames: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: None,
            preset: SessionPreset::default(),
            buffer_count: 4,
            discard_late_frames: true,
        }
    }
}

/// Classifier model and gating settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory holding `<name>.onnx` and `<name>.labels`.
    pub resources_dir: PathBuf,
    /// Model base name.
    pub name: String,
    /// Name of the model's image input tensor.
    pub input_name: String,
    /// Side length of the square model input.
    pub input_size: u32,
    /// Apply softmax to the model output.
    pub apply_softmax: bool,
    /// Confidence needed to flip the indicator.
    pub threshold: f32,
    /// Label shown once matched.
    pub match_label: String,
    /// Label shown before a match.
    pub no_match_label: String,
    /// Restrict matching to one class identifier.
    pub target_class: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            resources_dir: PathBuf::from("resources"),
            name: "SubaruSideViewClassifier".to_owned(),
            input_name: "input".to_owned(),
            input_size: 224,
            apply_softmax: true,
            threshold: 0.85,
            match_label: "Car".to_owned(),
            no_match_label: "No Car".to_owned(),
            target_class: None,
        }
    }
}

impl ModelConfig {
    /// Build the confidence gate described by this config.
    #[must_use]
    pub fn gate(&self) -> ConfidenceGate {
        let gate = ConfidenceGate::new(self.threshold, self.match_label.clone());
        match &self.target_class {
            Some(class) => gate.with_target_class(class.clone()),
            None => gate,
        }
    }
}

/// Permission handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    /// Behavior on denied or restricted camera access.
    pub on_denied: DenialMode,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Camera settings.
    pub camera: CameraConfig,
    /// Model settings.
    pub model: ModelConfig,
    /// Permission settings.
    pub permission: PermissionConfig,
}

impl AppConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let model = &self.model;
        if !(0.0..=1.0).contains(&model.threshold) {
            return Err(ConfigError::Invalid(format!(
                "model.threshold must be within [0, 1], got {}",
                model.threshold
            )));
        }
        if model.name.trim().is_empty() {
            return Err(ConfigError::Invalid("model.name must not be empty".to_owned()));
        }
        if model.input_name.trim().is_empty() {
            return Err(ConfigError::Invalid("model.input_name must not be empty".to_owned()));
        }
        if model.input_size == 0 {
            return Err(ConfigError::Invalid("model.input_size must be positive".to_owned()));
        }
        if model.match_label.is_empty() || model.no_match_label.is_empty() {
            return Err(ConfigError::Invalid("model labels must not be empty".to_owned()));
        }
        if self.camera.buffer_count == 0 {
            return Err(ConfigError::Invalid("camera.buffer_count must be at least 1".to_owned()));
        }
        Ok(())
    }
}
