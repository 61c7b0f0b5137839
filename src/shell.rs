//! Presentation shell: the UI-thread event loop.
//!
//! The shell owns the prediction state, the controller and the receiving end
//! of the UI queue. Rendering happens through [`StateObserver`]s.

use crate::controller::InferenceController;
use crate::dispatch::{MainQueue, UiEvent};
use crate::gate::ConfidenceGate;
use crate::state::{ButtonAffordance, ObservableState, PredictionState, StateObserver};
use crate::traits::DeviceProvider;
use std::io::Write;
use tracing::{debug, error, info};

/// UI-thread owner of the pipeline and its observable state.
pub struct PresentationShell<P: DeviceProvider> {
    controller: InferenceController<P>,
    state: ObservableState,
    gate: ConfidenceGate,
    queue: MainQueue,
}

impl<P: DeviceProvider> PresentationShell<P> {
    /// Create a shell showing `no_match_label` until the gate matches.
    pub fn new(
        controller: InferenceController<P>,
        gate: ConfidenceGate,
        no_match_label: &str,
        queue: MainQueue,
    ) -> Self {
        Self {
            controller,
            state: ObservableState::new(PredictionState::new(no_match_label)),
            gate,
            queue,
        }
    }

    /// Current state.
    pub const fn state(&self) -> &PredictionState {
        self.state.get()
    }

    /// The controller driven by this shell.
    pub const fn controller(&self) -> &InferenceController<P> {
        &self.controller
    }

    /// Attach a view. It renders the current state immediately.
    pub fn subscribe(&mut self, observer: Box<dyn StateObserver>) {
        self.state.subscribe(observer);
    }

    /// Apply one event. Returns `false` when the loop should end.
    pub fn handle(&mut self, event: UiEvent) -> bool {
        match event {
            UiEvent::Appeared => {
                if self.controller.check_and_request_permission().is_ok() {
                    self.start();
                }
            }
            UiEvent::PermissionResolved(granted) => {
                if self.controller.on_permission_resolved(granted).is_ok() {
                    self.start();
                }
            }
            UiEvent::Disappeared => self.controller.stop_session(),
            UiEvent::CaptureEnded(exit) => self.controller.on_capture_ended(exit),
            UiEvent::Observations(observations) => {
                let gate = &self.gate;
                self.state.update(|state| {
                    gate.toggle_indicator(state, &observations);
                });
            }
            UiEvent::StatusChanged(status) => {
                self.state.update(|state| state.status = status);
            }
            UiEvent::CaptureTapped => {
                self.state.update(PredictionState::tap_capture);
            }
            UiEvent::SaveTapped => {
                self.state.update(PredictionState::tap_save);
            }
            UiEvent::Shutdown => {
                self.controller.stop_session();
                return false;
            }
        }
        true
    }

    /// Process events until [`UiEvent::Shutdown`] or until every dispatcher is gone.
    pub fn run(&mut self) {
        info!("presentation loop started");
        while let Some(event) = self.queue.recv() {
            if !self.handle(event) {
                break;
            }
        }
        self.controller.stop_session();

        let stats = self.controller.stats();
        info!(
            delivered = stats.delivered,
            dropped = stats.dropped,
            matched = ?self.state.get().match_state,
            "presentation loop finished"
        );
    }

    fn start(&mut self) {
        if let Err(err) = self.controller.start_session() {
            error!(%err, "failed to start capture session");
        }
    }
}

/// Text rendering of the state, one line per change.
pub struct TerminalView<W: Write> {
    out: W,
}

impl<W: Write> TerminalView<W> {
    /// View writing to `out`.
    pub const fn new(out: W) -> Self {
        Self { out }
    }
}

/// Format one state line: label, button and status.
#[must_use]
pub fn render_line(state: &PredictionState) -> String {
    let button = match state.button() {
        ButtonAffordance::Capture(color) => format!("capture ({color})"),
        ButtonAffordance::Save => "save".to_owned(),
    };
    format!("{} | button: {button} | {}", state.label, state.status)
}

impl<W: Write> StateObserver for TerminalView<W> {
    fn state_changed(&mut self, state: &PredictionState) {
        let line = render_line(state);
        if let Err(err) = writeln!(self.out, "{line}").and_then(|()| self.out.flush()) {
            debug!(%err, "terminal view write failed");
        }
    }
}
