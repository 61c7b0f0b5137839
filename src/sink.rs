//! Frame sink: runs the inference requests on every delivered frame.

use crate::inference::{ImageRequestHandler, Orientation, RequestSet};
use crate::session::FrameHandler;
use crate::traits::Frame;
use tracing::{trace, warn};

/// Per-frame entry point of the pipeline.
///
/// Holds nothing but the request set it was built with, so it cannot exist
/// before the requests do.
#[derive(Debug, Clone)]
pub struct FrameSink {
    requests: RequestSet,
}

impl FrameSink {
    /// Create a sink applying `requests` to each frame.
    #[must_use]
    pub const fn new(requests: RequestSet) -> Self {
        Self { requests }
    }
}

impl FrameHandler for FrameSink {
    fn on_frame(&self, frame: &Frame) {
        let sequence = frame.metadata.sequence;
        let Some(buffer) = frame.pixel_buffer() else {
            trace!(sequence, bytes = frame.data.len(), "no usable pixel buffer, skipping frame");
            return;
        };

        let handler = ImageRequestHandler::new(buffer, Orientation::Up);
        if let Err(err) = handler.perform(&self.requests) {
            warn!(sequence, %err, "inference failed, frame dropped");
        }
    }
}
