//! Inference controller: camera permission, model loading and the capture
//! session lifecycle.
//!
//! The controller lives on the UI thread. Everything it learns from other
//! threads (permission answers, inference results) arrives as a [`UiEvent`]
//! through the [`MainDispatcher`] it was built with.

use crate::config::{AppConfig, CameraConfig, ModelConfig};
use crate::dispatch::{MainDispatcher, UiEvent};
use crate::error::SetupError;
use crate::inference::{InferenceRequest, RequestSet};
use crate::model::{ModelLoader, ModelResource};
use crate::permission::{AuthorizationStatus, DenialPolicy, PermissionProvider};
use crate::session::{CaptureExit, CaptureInput, CaptureSession, FrameOutput, SessionStats};
use crate::sink::FrameSink;
use crate::state::PipelineStatus;
use crate::traits::{self, DeviceProvider};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Owns the capture session and drives it from permission to running.
pub struct InferenceController<P: DeviceProvider> {
    camera: CameraConfig,
    model: ModelConfig,
    devices: P,
    permission: Box<dyn PermissionProvider>,
    denial: Box<dyn DenialPolicy>,
    loader: Box<dyn ModelLoader>,
    dispatcher: MainDispatcher,
    session: CaptureSession<P::Device>,
    requests: Option<RequestSet>,
}

impl<P: DeviceProvider> InferenceController<P> {
    /// Build a controller. The denial policy comes from `config.permission`.
    pub fn new(
        config: &AppConfig,
        devices: P,
        permission: Box<dyn PermissionProvider>,
        loader: Box<dyn ModelLoader>,
        dispatcher: MainDispatcher,
    ) -> Self {
        let mut session = CaptureSession::new();
        let on_exit = dispatcher.clone();
        session.set_exit_handler(Arc::new(move |exit: &CaptureExit| {
            on_exit.post(UiEvent::CaptureEnded(exit.clone()));
        }));
        Self {
            camera: config.camera.clone(),
            model: config.model.clone(),
            devices,
            permission,
            denial: config.permission.on_denied.policy(),
            loader,
            dispatcher,
            session,
            requests: None,
        }
    }

    /// Replace the denial policy.
    #[must_use]
    pub fn with_denial_policy(mut self, policy: Box<dyn DenialPolicy>) -> Self {
        self.denial = policy;
        self
    }

    /// The capture session.
    pub const fn session(&self) -> &CaptureSession<P::Device> {
        &self.session
    }

    /// Frame flow counters of the session.
    pub fn stats(&self) -> SessionStats {
        self.session.stats()
    }

    /// Check camera authorization and set up the pipeline if allowed.
    ///
    /// An undetermined status triggers an asynchronous request; its answer
    /// comes back as [`UiEvent::PermissionResolved`] and must be passed to
    /// [`on_permission_resolved`](Self::on_permission_resolved).
    pub fn check_and_request_permission(&mut self) -> Result<(), SetupError> {
        let status = self.permission.status();
        debug!(%status, "camera authorization");
        match status {
            AuthorizationStatus::Authorized => self.setup_camera(),
            AuthorizationStatus::NotDetermined => {
                self.publish(PipelineStatus::AwaitingPermission);
                let dispatcher = self.dispatcher.clone();
                self.permission.request_access(Box::new(move |granted| {
                    dispatcher.post(UiEvent::PermissionResolved(granted));
                }));
                Ok(())
            }
            AuthorizationStatus::Denied | AuthorizationStatus::Restricted => {
                self.denial.on_denied(status, &self.dispatcher);
                Ok(())
            }
        }
    }

    /// Continue after the asynchronous permission request was answered.
    pub fn on_permission_resolved(&mut self, granted: bool) -> Result<(), SetupError> {
        if granted {
            info!("camera access granted");
            self.setup_camera()
        } else {
            self.denial.on_denied(AuthorizationStatus::Denied, &self.dispatcher);
            Ok(())
        }
    }

    /// Load the model and configure the session. Does nothing when the
    /// session is already configured.
    ///
    /// Failures are logged, published as [`PipelineStatus::SetupFailed`] and
    /// returned. Nothing is retried.
    pub fn setup_camera(&mut self) -> Result<(), SetupError> {
        if self.session.is_configured() {
            return Ok(());
        }

        let result = self
            .load_model_and_build_request()
            .and_then(|_| self.configure_session());
        match result {
            Ok(()) => {
                self.publish(PipelineStatus::Configured);
                Ok(())
            }
            Err(err) => {
                error!(%err, "camera setup failed");
                self.publish(PipelineStatus::SetupFailed(err.to_string()));
                Err(err)
            }
        }
    }

    /// Locate and load the model, and build the request whose results are
    /// posted to the UI thread. Built once; later calls reuse it.
    pub fn load_model_and_build_request(&mut self) -> Result<RequestSet, SetupError> {
        if let Some(requests) = &self.requests {
            return Ok(requests.clone());
        }

        let resource = ModelResource::locate(&self.model.resources_dir, &self.model.name)?;
        let classifier = self.loader.load(&resource)?;
        info!(model = resource.name(), classifier = classifier.name(), "model loaded");

        let dispatcher = self.dispatcher.clone();
        let request = InferenceRequest::new(classifier, move |observations| {
            dispatcher.post(UiEvent::Observations(observations));
        });
        let requests = RequestSet::new(vec![request])?;
        self.requests = Some(requests.clone());
        Ok(requests)
    }

    /// Attach the camera and the frame sink in one configuration transaction.
    ///
    /// Requires the request set to be built first. Already configured
    /// sessions are left alone.
    pub fn configure_session(&mut self) -> Result<(), SetupError> {
        if self.session.is_configured() {
            return Ok(());
        }
        let requests = self.requests.clone().ok_or(SetupError::EmptyRequestSet)?;
        let device = self.devices.default_device()?.ok_or(SetupError::NoDevice)?;

        let input = CaptureInput::new(device);
        let output = FrameOutput::new(Arc::new(FrameSink::new(requests)))
            .with_discard_late_frames(self.camera.discard_late_frames)
            .with_buffer_count(self.camera.buffer_count);

        let mut config = self.session.begin_configuration();
        config.set_preset(self.camera.preset);
        if !config.can_add_input(&input) {
            return Err(SetupError::CannotAddInput);
        }
        config.add_input(input);
        if !config.can_add_output(&output) {
            return Err(SetupError::CannotAddOutput);
        }
        config.add_output(output);
        let format = config.commit()?;

        info!(
            preset = ?self.camera.preset,
            format = ?format,
            discard_late_frames = self.camera.discard_late_frames,
            "capture session configured"
        );
        Ok(())
    }

    /// Start frame delivery. No-op when unconfigured or already running.
    pub fn start_session(&mut self) -> traits::Result<()> {
        if self.session.start_running()? {
            self.publish(PipelineStatus::Running);
        }
        Ok(())
    }

    /// Stop frame delivery. No-op when not running.
    pub fn stop_session(&mut self) {
        let was_running = self.session.is_running();
        self.session.stop_running();
        if was_running {
            self.publish(PipelineStatus::Stopped);
        }
    }

    /// Capture ended on its own: release the capture thread and publish why.
    /// A later [`start_session`](Self::start_session) starts capturing again.
    pub fn on_capture_ended(&mut self, exit: CaptureExit) {
        if self.session.is_running() {
            debug!(%exit, "stale capture exit, session restarted since");
            return;
        }
        self.session.stop_running();
        self.publish(PipelineStatus::CaptureEnded(exit));
    }

    fn publish(&self, status: PipelineStatus) {
        self.dispatcher.post(UiEvent::StatusChanged(status));
    }
}

impl<P: DeviceProvider> fmt::Debug for InferenceController<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceController")
            .field("model", &self.model.name)
            .field("session", &self.session)
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}
