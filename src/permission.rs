//! Camera authorization.
//!
//! On Linux the camera is "authorized" when the device node can be opened for
//! reading and writing. Permission is granted out-of-band (udev rules, the
//! `video` group), so a request never prompts: it answers with the current
//! status.

use crate::dispatch::{MainDispatcher, UiEvent};
use crate::state::PipelineStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{info, warn};

/// Camera authorization states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    /// Access granted.
    Authorized,
    /// Access refused.
    Denied,
    /// The user has not been asked yet.
    NotDetermined,
    /// Access is impossible on this system.
    Restricted,
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authorized => f.write_str("authorized"),
            Self::Denied => f.write_str("denied"),
            Self::NotDetermined => f.write_str("not determined"),
            Self::Restricted => f.write_str("restricted"),
        }
    }
}

/// Callback receiving the answer to a permission request.
pub type AccessReply = Box<dyn FnOnce(bool) + Send>;

/// Platform permission service.
pub trait PermissionProvider: Send + Sync {
    /// Current authorization.
    fn status(&self) -> AuthorizationStatus;

    /// Ask for access. `reply` may run on any thread, at any later time.
    fn request_access(&self, reply: AccessReply);
}

/// Permission derived from access to a V4L2 device node.
#[derive(Debug, Clone)]
pub struct DeviceNodePermission {
    node: PathBuf,
}

impl DeviceNodePermission {
    /// Check access to `node`, e.g. `/dev/video0`.
    #[must_use]
    pub fn new(node: impl Into<PathBuf>) -> Self {
        Self { node: node.into() }
    }
}

impl PermissionProvider for DeviceNodePermission {
    fn status(&self) -> AuthorizationStatus {
        match OpenOptions::new().read(true).write(true).open(&self.node) {
            Ok(_) => AuthorizationStatus::Authorized,
            Err(err) if err.kind() == ErrorKind::PermissionDenied => AuthorizationStatus::Denied,
            Err(err) if err.kind() == ErrorKind::NotFound => AuthorizationStatus::Restricted,
            Err(err) => {
                warn!(node = %self.node.display(), %err, "cannot open camera node");
                AuthorizationStatus::Restricted
            }
        }
    }

    fn request_access(&self, reply: AccessReply) {
        reply(self.status() == AuthorizationStatus::Authorized);
    }
}

/// What to do when camera access is refused.
pub trait DenialPolicy: Send + Sync {
    /// Called once per refused check or request.
    fn on_denied(&self, status: AuthorizationStatus, dispatcher: &MainDispatcher);
}

/// Log and do nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreDenial;

impl DenialPolicy for IgnoreDenial {
    fn on_denied(&self, status: AuthorizationStatus, _dispatcher: &MainDispatcher) {
        info!(%status, "camera access refused; pipeline stays idle");
    }
}

/// Surface the refusal as a pipeline status.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportDenial;

impl DenialPolicy for ReportDenial {
    fn on_denied(&self, status: AuthorizationStatus, dispatcher: &MainDispatcher) {
        warn!(%status, "camera access refused");
        dispatcher.post(UiEvent::StatusChanged(PipelineStatus::PermissionDenied(status)));
    }
}

/// Configurable choice of [`DenialPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialMode {
    /// Use [`IgnoreDenial`].
    Ignore,
    /// Use [`ReportDenial`].
    #[default]
    Report,
}

impl DenialMode {
    /// Build the policy for this mode.
    #[must_use]
    pub fn policy(self) -> Box<dyn DenialPolicy> {
        match self {
            Self::Ignore => Box::new(IgnoreDenial),
            Self::Report => Box::new(ReportDenial),
        }
    }
}
