//! Message passing onto the UI thread.
//!
//! Worker threads never touch [`crate::state::PredictionState`]; they post a
//! [`UiEvent`] and the UI loop applies it. The queue is an unbounded FIFO, so
//! events are applied in the order they were posted.

use crate::inference::Observation;
use crate::session::CaptureExit;
use crate::state::PipelineStatus;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;
use tracing::debug;

/// Everything the UI thread reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// The screen became visible.
    Appeared,
    /// The screen went away.
    Disappeared,
    /// Answer to an asynchronous permission request.
    PermissionResolved(bool),
    /// Results of one inference request.
    Observations(Vec<Observation>),
    /// Pipeline status changed.
    StatusChanged(PipelineStatus),
    /// The capture thread ended without being stopped.
    CaptureEnded(CaptureExit),
    /// User tapped the capture button.
    CaptureTapped,
    /// User tapped the save button.
    SaveTapped,
    /// Stop everything and leave the event loop.
    Shutdown,
}

/// Sending half of the UI event queue. Cheap to clone, usable from any thread.
#[derive(Debug, Clone)]
pub struct MainDispatcher {
    tx: Sender<UiEvent>,
}

impl MainDispatcher {
    /// Create a dispatcher and the queue it feeds.
    #[must_use]
    pub fn channel() -> (Self, MainQueue) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, MainQueue { rx })
    }

    /// Post an event. Returns `false` once the UI loop is gone.
    pub fn post(&self, event: UiEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(err) => {
                debug!(event = ?err.into_inner(), "UI queue closed, dropping event");
                false
            }
        }
    }
}

/// Receiving half of the UI event queue, owned by the UI thread.
#[derive(Debug)]
pub struct MainQueue {
    rx: Receiver<UiEvent>,
}

impl MainQueue {
    /// Block until the next event; `None` when every dispatcher is dropped.
    pub fn recv(&self) -> Option<UiEvent> {
        self.rx.recv().ok()
    }

    /// Wait at most `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<UiEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&self) -> Option<UiEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no events are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
