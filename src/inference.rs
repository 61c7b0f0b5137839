//! Inference requests and the per-frame request handler.
//!
//! A [`Classifier`] is the loaded model. An [`InferenceRequest`] binds a
//! classifier to a completion callback, and a [`RequestSet`] is the immutable
//! list of requests applied to every frame by [`ImageRequestHandler`].

use crate::error::{InferenceError, SetupError};
use crate::traits::PixelBuffer;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// How the pixel buffer must be rotated to appear upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    /// Buffer is already upright.
    #[default]
    Up,
    /// Buffer is rotated 180 degrees.
    Down,
    /// Buffer must be rotated 90 degrees counter-clockwise.
    Left,
    /// Buffer must be rotated 90 degrees clockwise.
    Right,
}

/// A pixel buffer viewed through an [`Orientation`].
#[derive(Debug, Clone, Copy)]
pub struct OrientedImage<'a> {
    buffer: PixelBuffer<'a>,
    orientation: Orientation,
}

impl<'a> OrientedImage<'a> {
    /// Wrap a buffer with its orientation.
    #[must_use]
    pub const fn new(buffer: PixelBuffer<'a>, orientation: Orientation) -> Self {
        Self {
            buffer,
            orientation,
        }
    }

    /// Upright width.
    #[must_use]
    pub const fn width(&self) -> u32 {
        match self.orientation {
            Orientation::Up | Orientation::Down => self.buffer.width(),
            Orientation::Left | Orientation::Right => self.buffer.height(),
        }
    }

    /// Upright height.
    #[must_use]
    pub const fn height(&self) -> u32 {
        match self.orientation {
            Orientation::Up | Orientation::Down => self.buffer.height(),
            Orientation::Left | Orientation::Right => self.buffer.width(),
        }
    }

    /// RGB value at upright coordinates.
    #[must_use]
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let (bw, bh) = (self.buffer.width(), self.buffer.height());
        let (src_x, src_y) = match self.orientation {
            Orientation::Up => (x, y),
            Orientation::Down => (bw - 1 - x, bh - 1 - y),
            Orientation::Left => (bw - 1 - y, x),
            Orientation::Right => (y, bh - 1 - x),
        };
        self.buffer.rgb_at(src_x, src_y)
    }
}

/// Whole-image classification result.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationObservation {
    /// Class label.
    pub identifier: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
}

/// Normalized bounding box, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Left edge in [0, 1].
    pub x: f32,
    /// Top edge in [0, 1].
    pub y: f32,
    /// Width in [0, 1].
    pub width: f32,
    /// Height in [0, 1].
    pub height: f32,
}

/// Localized detection result.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedObjectObservation {
    /// Where the object is.
    pub bounding_box: BoundingBox,
    /// Detection confidence.
    pub confidence: f32,
    /// Candidate labels for the object, best first.
    pub labels: Vec<ClassificationObservation>,
}

/// One result produced by a classifier.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// Whole-image classification.
    Classification(ClassificationObservation),
    /// Localized detection.
    RecognizedObject(RecognizedObjectObservation),
}

impl Observation {
    /// Shorthand for a classification observation.
    #[must_use]
    pub fn classification(identifier: impl Into<String>, confidence: f32) -> Self {
        Self::Classification(ClassificationObservation {
            identifier: identifier.into(),
            confidence,
        })
    }

    /// The classification payload, if this is one.
    #[must_use]
    pub const fn as_classification(&self) -> Option<&ClassificationObservation> {
        match self {
            Self::Classification(observation) => Some(observation),
            Self::RecognizedObject(_) => None,
        }
    }
}

/// A loaded model that can classify an image.
pub trait Classifier: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Classify an upright image.
    fn classify(&self, image: &OrientedImage<'_>) -> Result<Vec<Observation>, InferenceError>;
}

/// Callback receiving the observations of one successful request.
pub type Completion = Box<dyn Fn(Vec<Observation>) + Send + Sync>;

/// A classifier bound to its completion callback.
pub struct InferenceRequest {
    classifier: Arc<dyn Classifier>,
    completion: Completion,
}

impl InferenceRequest {
    /// Build a request. The completion runs on the thread performing the request.
    pub fn new(
        classifier: Arc<dyn Classifier>,
        completion: impl Fn(Vec<Observation>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            classifier,
            completion: Box::new(completion),
        }
    }

    fn perform(&self, image: &OrientedImage<'_>) -> Result<(), InferenceError> {
        let observations = self.classifier.classify(image)?;
        trace!(
            classifier = self.classifier.name(),
            count = observations.len(),
            "inference completed"
        );
        (self.completion)(observations);
        Ok(())
    }
}

impl fmt::Debug for InferenceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceRequest")
            .field("classifier", &self.classifier.name())
            .finish_non_exhaustive()
    }
}

/// Immutable, non-empty list of inference requests.
///
/// Cloning shares the same requests.
#[derive(Debug, Clone)]
pub struct RequestSet {
    requests: Arc<[InferenceRequest]>,
}

impl RequestSet {
    /// Build a set; fails when `requests` is empty.
    pub fn new(requests: Vec<InferenceRequest>) -> Result<Self, SetupError> {
        if requests.is_empty() {
            return Err(SetupError::EmptyRequestSet);
        }
        Ok(Self {
            requests: requests.into(),
        })
    }

    /// Number of requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the set has no requests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = &InferenceRequest> {
        self.requests.iter()
    }
}

/// Applies a request set to one image.
#[derive(Debug)]
pub struct ImageRequestHandler<'a> {
    image: OrientedImage<'a>,
}

impl<'a> ImageRequestHandler<'a> {
    /// Create a handler for one pixel buffer.
    #[must_use]
    pub const fn new(buffer: PixelBuffer<'a>, orientation: Orientation) -> Self {
        Self {
            image: OrientedImage::new(buffer, orientation),
        }
    }

    /// Run every request synchronously, in order.
    ///
    /// A failing request does not prevent the others from running; the first
    /// failure is returned after all requests were attempted.
    pub fn perform(&self, requests: &RequestSet) -> Result<(), InferenceError> {
        if self.image.width() == 0 || self.image.height() == 0 {
            return Err(InferenceError::EmptyImage {
                width: self.image.width(),
                height: self.image.height(),
            });
        }

        let mut first_error = None;
        for request in requests.iter() {
            if let Err(err) = request.perform(&self.image) {
                first_error.get_or_insert(err);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
