//! UI-observable prediction state.
//!
//! The state lives on the UI thread inside [`ObservableState`]. Other threads
//! never touch it; they post [`crate::dispatch::UiEvent`]s through
//! [`crate::dispatch::MainDispatcher`] and the UI loop applies them.
//! [`ObservableState`] is the one type here that is not `Send`, because its
//! observers need not be.

use crate::permission::AuthorizationStatus;
use crate::session::CaptureExit;
use std::fmt;

/// Fill color of the capture button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorColor {
    /// Nothing recognized yet.
    Red,
    /// Target recognized.
    Blue,
}

impl fmt::Display for IndicatorColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Red => f.write_str("red"),
            Self::Blue => f.write_str("blue"),
        }
    }
}

/// Whether the classifier has ever been confident enough.
///
/// `Match` is terminal for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchState {
    /// Initial state.
    #[default]
    NoMatch,
    /// A frame crossed the confidence threshold.
    Match,
}

/// Lifecycle of the capture pipeline as seen by the user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PipelineStatus {
    /// Nothing attempted yet.
    #[default]
    Idle,
    /// Waiting for the user to answer the permission prompt.
    AwaitingPermission,
    /// Camera access was refused.
    PermissionDenied(AuthorizationStatus),
    /// Session configured but not running.
    Configured,
    /// Frames are flowing.
    Running,
    /// Session stopped.
    Stopped,
    /// Capture ended on its own; the next start retries.
    CaptureEnded(CaptureExit),
    /// Setup failed; the pipeline will not start.
    SetupFailed(String),
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::AwaitingPermission => f.write_str("awaiting camera permission"),
            Self::PermissionDenied(status) => write!(f, "camera access {status}"),
            Self::Configured => f.write_str("configured"),
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
            Self::CaptureEnded(exit) => write!(f, "capture ended: {exit}"),
            Self::SetupFailed(reason) => write!(f, "setup failed: {reason}"),
        }
    }
}

/// What the capture button currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAffordance {
    /// Round capture button filled with the indicator color.
    Capture(IndicatorColor),
    /// "Save" capsule shown after a capture tap.
    Save,
}

/// Everything the presentation renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionState {
    /// Prediction label text.
    pub label: String,
    /// Capture button fill color.
    pub indicator: IndicatorColor,
    /// Match state machine.
    pub match_state: MatchState,
    /// Whether the capture button was tapped.
    pub is_taken: bool,
    /// Pipeline status.
    pub status: PipelineStatus,
}

impl PredictionState {
    /// Initial state showing `no_match_label`.
    #[must_use]
    pub fn new(no_match_label: impl Into<String>) -> Self {
        Self {
            label: no_match_label.into(),
            indicator: IndicatorColor::Red,
            match_state: MatchState::NoMatch,
            is_taken: false,
            status: PipelineStatus::Idle,
        }
    }

    /// Current button affordance.
    #[must_use]
    pub const fn button(&self) -> ButtonAffordance {
        if self.is_taken {
            ButtonAffordance::Save
        } else {
            ButtonAffordance::Capture(self.indicator)
        }
    }

    /// Capture button tapped.
    pub fn tap_capture(&mut self) {
        self.is_taken = !self.is_taken;
    }

    /// Save button tapped. Nothing is written anywhere.
    pub fn tap_save(&mut self) {
        self.is_taken = false;
    }
}

/// Receives state after every change.
pub trait StateObserver {
    /// Called with the new state.
    fn state_changed(&mut self, state: &PredictionState);
}

/// Prediction state plus its observers.
pub struct ObservableState {
    state: PredictionState,
    observers: Vec<Box<dyn StateObserver>>,
}

impl ObservableState {
    /// Wrap an initial state.
    #[must_use]
    pub fn new(state: PredictionState) -> Self {
        Self {
            state,
            observers: Vec::new(),
        }
    }

    /// Register an observer and render the current state to it once.
    pub fn subscribe(&mut self, mut observer: Box<dyn StateObserver>) {
        observer.state_changed(&self.state);
        self.observers.push(observer);
    }

    /// Current state.
    #[must_use]
    pub const fn get(&self) -> &PredictionState {
        &self.state
    }

    /// Mutate the state; observers are notified only if something changed.
    ///
    /// Returns whether the state changed.
    pub fn update<F>(&mut self, mutate: F) -> bool
    where
        F: FnOnce(&mut PredictionState),
    {
        let before = self.state.clone();
        mutate(&mut self.state);
        if before == self.state {
            return false;
        }
        for observer in &mut self.observers {
            observer.state_changed(&self.state);
        }
        true
    }
}

impl fmt::Debug for ObservableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableState")
            .field("state", &self.state)
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder(Rc<RefCell<Vec<PredictionState>>>);

    impl StateObserver for Recorder {
        fn state_changed(&mut self, state: &PredictionState) {
            self.0.borrow_mut().push(state.clone());
        }
    }

    #[test]
    fn test_initial_state() {
        let state = PredictionState::new("No Car");
        assert_eq!(state.label, "No Car");
        assert_eq!(state.match_state, MatchState::NoMatch);
        assert_eq!(state.button(), ButtonAffordance::Capture(IndicatorColor::Red));
        assert_eq!(state.status, PipelineStatus::Idle);
    }

    #[test]
    fn test_capture_then_save() {
        let mut state = PredictionState::new("No Car");
        state.tap_capture();
        assert!(state.is_taken);
        assert_eq!(state.button(), ButtonAffordance::Save);

        state.tap_save();
        assert!(!state.is_taken);
        assert_eq!(state.button(), ButtonAffordance::Capture(IndicatorColor::Red));
    }

    #[test]
    fn test_observers_notified_only_on_change() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut observable = ObservableState::new(PredictionState::new("No Car"));
        observable.subscribe(Box::new(Recorder(Rc::clone(&seen))));
        assert_eq!(seen.borrow().len(), 1);

        assert!(!observable.update(|state| state.is_taken = false));
        assert_eq!(seen.borrow().len(), 1);

        assert!(observable.update(PredictionState::tap_capture));
        assert_eq!(seen.borrow().len(), 2);
        assert!(seen.borrow().last().is_some_and(|state| state.is_taken));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(PipelineStatus::Running.to_string(), "running");
        assert_eq!(
            PipelineStatus::SetupFailed("no camera".to_owned()).to_string(),
            "setup failed: no camera"
        );
        assert_eq!(
            PipelineStatus::CaptureEnded(CaptureExit::TooManyErrors(10)).to_string(),
            "capture ended: 10 consecutive capture errors"
        );
    }
}
