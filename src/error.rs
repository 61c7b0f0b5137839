//! Error types for pipeline setup, inference and configuration.

use crate::traits::CameraError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop the pipeline from being set up.
///
/// None of these are retried: the session simply never starts running.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The model file is not present in the resources directory.
    #[error("model resource {name:?} not found in {}", dir.display())]
    ModelMissing {
        /// Model name that was looked up.
        name: String,
        /// Directory that was searched.
        dir: PathBuf,
    },
    /// The model file exists but could not be loaded.
    #[error("failed to load model {name:?}: {reason}")]
    ModelLoad {
        /// Model name.
        name: String,
        /// Loader diagnostic.
        reason: String,
    },
    /// A frame sink cannot be built without inference requests.
    #[error("inference request set is empty")]
    EmptyRequestSet,
    /// No capture-capable camera was found.
    #[error("no capture-capable camera device available")]
    NoDevice,
    /// The session refused the camera input.
    #[error("cannot add camera input to capture session")]
    CannotAddInput,
    /// The session refused the frame output.
    #[error("cannot add frame output to capture session")]
    CannotAddOutput,
    /// Camera-level failure while configuring.
    #[error(transparent)]
    Camera(#[from] CameraError),
}

/// Per-frame inference failure. The frame is dropped, the pipeline continues.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The classifier rejected or failed on the input.
    #[error("classifier {classifier} failed: {reason}")]
    Failed {
        /// Classifier name.
        classifier: String,
        /// Diagnostic from the backend.
        reason: String,
    },
    /// The oriented image has no pixels.
    #[error("input image is empty ({width}x{height})")]
    EmptyImage {
        /// Image width.
        width: u32,
        /// Image height.
        height: u32,
    },
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}
