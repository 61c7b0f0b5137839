//! Confidence gate: turns classification results into indicator changes.

use crate::inference::Observation;
use crate::state::{IndicatorColor, MatchState, PredictionState};
use tracing::{debug, info};

/// Decides when the prediction state flips to [`MatchState::Match`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceGate {
    threshold: f32,
    match_label: String,
    target_class: Option<String>,
}

impl ConfidenceGate {
    /// Gate matching any class whose confidence reaches `threshold`.
    ///
    /// `threshold` is clamped into [0, 1].
    #[must_use]
    pub fn new(threshold: f32, match_label: impl Into<String>) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            match_label: match_label.into(),
            target_class: None,
        }
    }

    /// Only count observations whose identifier equals `class`.
    #[must_use]
    pub fn with_target_class(mut self, class: impl Into<String>) -> Self {
        self.target_class = Some(class.into());
        self
    }

    /// Configured threshold.
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Apply one frame's observations to `state`.
    ///
    /// Only whole-image classifications are considered; localized detections
    /// are ignored. Returns `true` if this call switched the state to `Match`.
    /// There is no transition back: once matched, later frames change nothing.
    pub fn toggle_indicator(
        &self,
        state: &mut PredictionState,
        observations: &[Observation],
    ) -> bool {
        let hit = observations
            .iter()
            .filter_map(Observation::as_classification)
            .filter(|observation| {
                self.target_class
                    .as_deref()
                    .map_or(true, |target| observation.identifier == target)
            })
            .inspect(|observation| {
                debug!(
                    identifier = %observation.identifier,
                    confidence = observation.confidence,
                    "classification"
                );
            })
            .find(|observation| observation.confidence >= self.threshold);

        let Some(hit) = hit else {
            return false;
        };
        if state.match_state == MatchState::Match {
            return false;
        }

        info!(
            identifier = %hit.identifier,
            confidence = hit.confidence,
            label = %self.match_label,
            "confidence threshold reached"
        );
        state.match_state = MatchState::Match;
        state.label.clone_from(&self.match_label);
        state.indicator = IndicatorColor::Blue;
        true
    }
}
