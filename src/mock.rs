//! Mock devices, classifiers and services for testing without hardware.

use crate::error::{InferenceError, SetupError};
use crate::inference::{Classifier, Observation, OrientedImage};
use crate::model::{ModelLoader, ModelResource};
use crate::permission::{AccessReply, AuthorizationStatus, PermissionProvider};
use crate::session::FrameHandler;
use crate::traits::{
    CameraDevice, CameraError, CaptureStream, DeviceCapabilities, DeviceProvider, Format, FourCC,
    Frame, FrameMetadata, Result,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Poll `condition` until it holds or `timeout` expires.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Mock device for testing without hardware.
#[derive(Debug, Clone)]
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    format: Format,
    forced_format: Option<Format>,
    pattern: TestPattern,
    frame_count: u32,
    frame_limit: Option<u32>,
    frame_interval: Option<Duration>,
    empty_frames: Vec<u32>,
    failing: bool,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            format: Format::new(640, 480, FourCC::YUYV),
            forced_format: None,
            pattern: TestPattern::ColorBars,
            frame_count: 0,
            frame_limit: None,
            frame_interval: None,
            empty_frames: Vec::new(),
            failing: false,
        }
    }

    /// Set the format for this mock device.
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Set the capabilities for this mock device.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Make the "driver" answer every `set_format` with `format`.
    #[must_use]
    pub fn with_forced_format(mut self, format: Format) -> Self {
        self.forced_format = Some(format);
        self
    }

    /// Set the test pattern for frame generation.
    #[must_use]
    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// End the stream after `limit` frames.
    #[must_use]
    pub fn with_frame_limit(mut self, limit: u32) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    /// Sleep this long before producing each frame.
    #[must_use]
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Deliver these sequence numbers with no pixel data.
    #[must_use]
    pub fn with_empty_frames(mut self, sequences: Vec<u32>) -> Self {
        self.empty_frames = sequences;
        self
    }

    /// Fail every frame read.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }
}

impl CameraDevice for MockDevice {
    type Stream<'a> = MockStream<'a>;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn format(&self) -> Result<Format> {
        Ok(self.format.clone())
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        self.format = self.forced_format.clone().unwrap_or_else(|| format.clone());
        Ok(self.format.clone())
    }

    fn create_stream(&mut self, _buffer_count: u32) -> Result<Self::Stream<'_>> {
        Ok(MockStream { device: self })
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Mock capture stream for testing.
pub struct MockStream<'a> {
    device: &'a mut MockDevice,
}

impl CaptureStream for MockStream<'_> {
    fn next_frame(&mut self) -> Result<Frame> {
        if self.device.failing {
            return Err(CameraError::StreamError("mock read failure".to_owned()));
        }
        if self
            .device
            .frame_limit
            .is_some_and(|limit| self.device.frame_count >= limit)
        {
            return Err(CameraError::EndOfStream);
        }
        if let Some(interval) = self.device.frame_interval {
            thread::sleep(interval);
        }

        let format = self.device.format.clone();
        let seq = self.device.frame_count;
        self.device.frame_count += 1;

        let data = if self.device.empty_frames.contains(&seq) {
            Vec::new()
        } else {
            generate_test_frame(&format, self.device.pattern)
        };

        Ok(Frame {
            data,
            metadata: FrameMetadata {
                sequence: seq,
                timestamp: Duration::from_millis(u64::from(seq) * 33), // ~30fps
                bytes_used: format.size,
            },
            format,
        })
    }
}

/// Generate test frame data based on pattern.
fn generate_test_frame(format: &Format, pattern: TestPattern) -> Vec<u8> {
    let size = (format.width * format.height * 2) as usize; // YUYV = 2 bytes/pixel
    let mut data = vec![0u8; size];

    match pattern {
        TestPattern::ColorBars => generate_color_bars(&mut data, format.width, format.height),
        TestPattern::Solid(y, u, v) => generate_solid(&mut data, y, u, v),
    }

    data
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars[bar_idx];

            let offset = ((y * width + x) * 2) as usize;
            if let Some(pixel) = data.get_mut(offset..offset + 4) {
                pixel.copy_from_slice(&[y_val, u_val, y_val, v_val]);
            }
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for pixel in data.chunks_exact_mut(4) {
        pixel.copy_from_slice(&[y, u, y, v]);
    }
}

/// Hands out one prepared device, then nothing.
#[derive(Debug, Default)]
pub struct MockProvider {
    device: Mutex<Option<MockDevice>>,
}

impl MockProvider {
    /// Provider yielding `device` once.
    #[must_use]
    pub fn new(device: MockDevice) -> Self {
        Self {
            device: Mutex::new(Some(device)),
        }
    }

    /// Provider with no camera at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

impl DeviceProvider for MockProvider {
    type Device = MockDevice;

    fn default_device(&self) -> Result<Option<MockDevice>> {
        Ok(self.device.lock().ok().and_then(|mut device| device.take()))
    }
}

#[derive(Debug)]
enum Behavior {
    Constant(String, f32),
    Scripted(String, Mutex<VecDeque<f32>>),
    Brightness(String),
    Failing,
}

/// Classifier with canned answers.
#[derive(Debug)]
pub struct MockClassifier {
    behavior: Behavior,
    calls: AtomicUsize,
}

impl MockClassifier {
    fn with(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answer `identifier` with `confidence`.
    #[must_use]
    pub fn constant(identifier: &str, confidence: f32) -> Self {
        Self::with(Behavior::Constant(identifier.to_owned(), confidence))
    }

    /// Answer with each confidence in turn, then 0.0.
    #[must_use]
    pub fn scripted(identifier: &str, confidences: Vec<f32>) -> Self {
        Self::with(Behavior::Scripted(
            identifier.to_owned(),
            Mutex::new(confidences.into()),
        ))
    }

    /// Confidence is the luma of the center pixel divided by 255.
    #[must_use]
    pub fn brightness(identifier: &str) -> Self {
        Self::with(Behavior::Brightness(identifier.to_owned()))
    }

    /// Fail every call.
    #[must_use]
    pub fn failing() -> Self {
        Self::with(Behavior::Failing)
    }

    /// Number of classify calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for MockClassifier {
    fn name(&self) -> &str {
        "mock"
    }

    fn classify(
        &self,
        image: &OrientedImage<'_>,
    ) -> std::result::Result<Vec<Observation>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (identifier, confidence) = match &self.behavior {
            Behavior::Constant(identifier, confidence) => (identifier, *confidence),
            Behavior::Scripted(identifier, script) => {
                let next = script.lock().ok().and_then(|mut queue| queue.pop_front());
                (identifier, next.unwrap_or(0.0))
            }
            Behavior::Brightness(identifier) => {
                let (r, _, _) = image
                    .rgb_at(image.width() / 2, image.height() / 2)
                    .unwrap_or((0, 0, 0));
                (identifier, f32::from(r) / 255.0)
            }
            Behavior::Failing => {
                return Err(InferenceError::Failed {
                    classifier: "mock".to_owned(),
                    reason: "scripted failure".to_owned(),
                })
            }
        };
        Ok(vec![Observation::classification(identifier.clone(), confidence)])
    }
}

/// Loader returning a prepared classifier, or failing.
pub struct MockLoader {
    classifier: Option<Arc<dyn Classifier>>,
}

impl MockLoader {
    /// Loader yielding `classifier`.
    #[must_use]
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier: Some(classifier),
        }
    }

    /// Loader that rejects every model.
    #[must_use]
    pub const fn failing() -> Self {
        Self { classifier: None }
    }
}

impl ModelLoader for MockLoader {
    fn load(
        &self,
        resource: &ModelResource,
    ) -> std::result::Result<Arc<dyn Classifier>, SetupError> {
        self.classifier
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| SetupError::ModelLoad {
                name: resource.name().to_owned(),
                reason: "mock loader refuses".to_owned(),
            })
    }
}

/// Permission service with a fixed status and scripted prompt answer.
#[derive(Debug, Clone, Copy)]
pub struct MockPermission {
    status: AuthorizationStatus,
    answer: Option<bool>,
}

impl MockPermission {
    /// Fixed status; requests answer `granted` from another thread.
    #[must_use]
    pub const fn new(status: AuthorizationStatus, answer: Option<bool>) -> Self {
        Self { status, answer }
    }
}

impl PermissionProvider for MockPermission {
    fn status(&self) -> AuthorizationStatus {
        self.status
    }

    fn request_access(&self, reply: AccessReply) {
        if let Some(granted) = self.answer {
            thread::spawn(move || reply(granted));
        }
    }
}

/// Frame handler recording sequence numbers and detecting overlapping calls.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    sequences: Mutex<Vec<u32>>,
    in_flight: AtomicBool,
    overlap: AtomicBool,
    delay: Option<Duration>,
}

impl RecordingHandler {
    /// New recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spend `delay` inside every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sequences seen so far.
    pub fn sequences(&self) -> Vec<u32> {
        self.sequences
            .lock()
            .map(|sequences| sequences.clone())
            .unwrap_or_default()
    }

    /// Whether two calls ever ran at the same time.
    pub fn saw_overlap(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }
}

impl FrameHandler for RecordingHandler {
    fn on_frame(&self, frame: &Frame) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlap.store(true, Ordering::SeqCst);
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if let Ok(mut sequences) = self.sequences.lock() {
            sequences.push(frame.metadata.sequence);
        }
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        assert_eq!(device.capabilities().driver, "mock");
        assert!(device.capabilities().can_capture);
        assert!(device.capabilities().can_stream);
    }

    #[test]
    fn test_mock_device_format() {
        let mut device = MockDevice::new();
        let format = device.format().expect("format should succeed");
        assert_eq!(format.width, 640);
        assert_eq!(format.height, 480);

        let new_format = Format::new(320, 240, FourCC::YUYV);
        let actual = device.set_format(&new_format).expect("set_format should succeed");
        assert_eq!(actual.width, 320);
        assert_eq!(actual.height, 240);
    }

    #[test]
    fn test_mock_stream_limit_and_empty_frames() {
        let mut device = MockDevice::new().with_frame_limit(2).with_empty_frames(vec![1]);
        let mut stream = device.create_stream(4).expect("create_stream should succeed");

        let frame1 = stream.next_frame().expect("next_frame should succeed");
        assert_eq!(frame1.metadata.sequence, 0);
        assert!(frame1.pixel_buffer().is_some());

        let frame2 = stream.next_frame().expect("next_frame should succeed");
        assert_eq!(frame2.metadata.sequence, 1);
        assert!(frame2.pixel_buffer().is_none());

        assert!(matches!(stream.next_frame(), Err(CameraError::EndOfStream)));
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::ColorBars);

        assert_eq!(data.len(), (640 * 480 * 2) as usize);
        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
    }

    #[test]
    fn test_solid_pattern() {
        let format = Format::new(64, 64, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Solid(128, 64, 192));

        assert_eq!(data[0], 128);
        assert_eq!(data[2], 128);
        assert_eq!(data[1], 64);
        assert_eq!(data[3], 192);
    }

    #[test]
    fn test_classifier_behaviors() {
        let mut device = MockDevice::new()
            .with_format(Format::new(8, 8, FourCC::YUYV))
            .with_pattern(TestPattern::Solid(255, 128, 128));
        let mut stream = device.create_stream(1).expect("create_stream should succeed");
        let frame = stream.next_frame().expect("next_frame should succeed");
        let image = OrientedImage::new(
            frame.pixel_buffer().expect("extractable"),
            crate::inference::Orientation::Up,
        );

        let confidence = |classifier: &MockClassifier| {
            classifier
                .classify(&image)
                .expect("classify should succeed")
                .first()
                .and_then(Observation::as_classification)
                .map(|observation| observation.confidence)
        };

        let scripted = MockClassifier::scripted("car", vec![0.2, 0.9]);
        assert_eq!(confidence(&scripted), Some(0.2));
        assert_eq!(confidence(&scripted), Some(0.9));
        assert_eq!(confidence(&scripted), Some(0.0));
        assert_eq!(scripted.calls(), 3);

        let bright = MockClassifier::brightness("car");
        assert_eq!(confidence(&bright), Some(1.0));
        assert!(MockClassifier::failing().classify(&image).is_err());
    }

    #[test]
    fn test_provider_yields_device_once() {
        let provider = MockProvider::new(MockDevice::new());
        assert!(provider.default_device().expect("provider").is_some());
        assert!(provider.default_device().expect("provider").is_none());
        assert!(MockProvider::empty().default_device().expect("provider").is_none());
    }
}
