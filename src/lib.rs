//! Pi-Cam-Classify: live camera classification for Raspberry Pi
//!
//! Frames from a V4L2 camera are classified one at a time on a worker thread;
//! results are posted to the UI thread, where a confidence gate flips the
//! prediction state once the model is confident enough. Device, permission
//! and model access sit behind traits so the whole pipeline runs against mock
//! devices in tests.

pub mod config;
pub mod controller;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod inference;
pub mod model;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod permission;
pub mod session;
pub mod shell;
pub mod sink;
pub mod state;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use config::AppConfig;
pub use controller::InferenceController;
pub use device::{V4L2Device, V4L2Provider};
pub use dispatch::{MainDispatcher, MainQueue, UiEvent};
pub use error::{ConfigError, InferenceError, SetupError};
pub use gate::ConfidenceGate;
pub use inference::{Classifier, Observation};
pub use session::{CaptureSession, SessionPreset};
pub use shell::{PresentationShell, TerminalView};
pub use state::PredictionState;
pub use traits::{
    CameraDevice, CameraError, CaptureStream, DeviceCapabilities, DeviceProvider, Format, FourCC,
    Frame, FrameMetadata,
};
