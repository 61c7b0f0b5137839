//! Capture session: camera input, frame output and the delivery threads.
//!
//! A running session owns two threads. The capture thread reads frames from
//! the device and hands them to the delivery thread, which calls the output's
//! [`FrameHandler`] once per frame, in capture order, never concurrently.
//!
//! With late-frame discarding enabled at most one frame waits for the
//! handler; frames captured while that slot is taken are dropped. Without it
//! the capture thread blocks until the handler catches up. There is no
//! timeout on the handler: a slow handler slows delivery, and with
//! discarding it bounds the backlog to one frame.
//!
//! The capture thread may also end on its own: end of stream, a stream that
//! cannot be created, or too many consecutive read errors. The session then
//! stops reporting itself as running, hands the [`CaptureExit`] to the exit
//! handler if one is set, and the next `start_running` starts over.

use crate::traits::{
    CameraDevice, CameraError, CaptureStream, DeviceCapabilities, Format, FourCC, Frame, Result,
};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// Consecutive read failures after which the capture thread gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Default number of driver buffers.
const DEFAULT_BUFFER_COUNT: u32 = 4;

/// Fixed capture resolutions. None exceeds 640x480.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionPreset {
    /// 640x480.
    #[default]
    #[serde(rename = "vga640x480")]
    Vga640x480,
    /// 320x240.
    #[serde(rename = "qvga320x240")]
    Qvga320x240,
}

impl SessionPreset {
    /// Width and height of the preset.
    #[must_use]
    pub const fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Vga640x480 => (640, 480),
            Self::Qvga320x240 => (320, 240),
        }
    }

    /// YUYV format requested from the driver.
    #[must_use]
    pub const fn format(self) -> Format {
        let (width, height) = self.dimensions();
        Format::new(width, height, FourCC::YUYV)
    }
}

/// Receives every delivered frame on the delivery thread.
pub trait FrameHandler: Send + Sync {
    /// Handle one frame. Must not panic; failures are the handler's to log.
    fn on_frame(&self, frame: &Frame);
}

/// Camera device wrapped for attachment to a session.
pub struct CaptureInput<D> {
    device: D,
}

impl<D: CameraDevice> CaptureInput<D> {
    /// Wrap a device.
    pub const fn new(device: D) -> Self {
        Self { device }
    }

    /// Capabilities of the wrapped device.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        self.device.capabilities()
    }
}

impl<D> fmt::Debug for CaptureInput<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureInput").finish_non_exhaustive()
    }
}

/// Frame output: where delivered frames go, and how late frames are treated.
pub struct FrameOutput {
    handler: Arc<dyn FrameHandler>,
    discard_late_frames: bool,
    buffer_count: u32,
}

impl FrameOutput {
    /// Output delivering to `handler`, discarding late frames.
    pub fn new(handler: Arc<dyn FrameHandler>) -> Self {
        Self {
            handler,
            discard_late_frames: true,
            buffer_count: DEFAULT_BUFFER_COUNT,
        }
    }

    /// Choose whether late frames are dropped or queued.
    #[must_use]
    pub fn with_discard_late_frames(mut self, discard: bool) -> Self {
        self.discard_late_frames = discard;
        self
    }

    /// Number of driver buffers; also the queue depth when not discarding.
    #[must_use]
    pub fn with_buffer_count(mut self, buffer_count: u32) -> Self {
        self.buffer_count = buffer_count.max(1);
        self
    }

    /// Whether late frames are dropped.
    pub const fn discards_late_frames(&self) -> bool {
        self.discard_late_frames
    }
}

impl fmt::Debug for FrameOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameOutput")
            .field("discard_late_frames", &self.discard_late_frames)
            .field("buffer_count", &self.buffer_count)
            .finish_non_exhaustive()
    }
}

/// Counters describing frame flow since the session was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    /// Frames read from the device.
    pub captured: u64,
    /// Frames handed to the handler.
    pub delivered: u64,
    /// Frames discarded because the handler was busy.
    pub dropped: u64,
    /// Failed device reads.
    pub errors: u64,
}

/// Why the capture thread ended without being asked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureExit {
    /// The device has no more frames.
    EndOfStream,
    /// The capture stream could not be created.
    StreamFailed(String),
    /// This many reads in a row failed.
    TooManyErrors(u32),
}

impl fmt::Display for CaptureExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => f.write_str("end of stream"),
            Self::StreamFailed(reason) => write!(f, "cannot start stream: {reason}"),
            Self::TooManyErrors(count) => write!(f, "{count} consecutive capture errors"),
        }
    }
}

/// Called on the capture thread when capture ends on its own.
pub type ExitHandler = Arc<dyn Fn(&CaptureExit) + Send + Sync>;

#[derive(Debug, Default)]
struct DeliveryStats {
    captured: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
}

impl DeliveryStats {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            captured: self.captured.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

struct RunningCapture<D> {
    running: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    capture: JoinHandle<CaptureInput<D>>,
    delivery: JoinHandle<()>,
}

/// The camera pipeline from device to frame handler.
pub struct CaptureSession<D: CameraDevice + Send + 'static> {
    preset: SessionPreset,
    input: Option<CaptureInput<D>>,
    output: Option<FrameOutput>,
    active_format: Option<Format>,
    running: Option<RunningCapture<D>>,
    stats: Arc<DeliveryStats>,
    exit_handler: Option<ExitHandler>,
}

impl<D: CameraDevice + Send + 'static> Default for CaptureSession<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: CameraDevice + Send + 'static> CaptureSession<D> {
    /// Create an empty, unconfigured session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            preset: SessionPreset::default(),
            input: None,
            output: None,
            active_format: None,
            running: None,
            stats: Arc::new(DeliveryStats::default()),
            exit_handler: None,
        }
    }

    /// Start a configuration transaction. Nothing changes until `commit`.
    pub fn begin_configuration(&mut self) -> SessionConfiguration<'_, D> {
        SessionConfiguration {
            preset: self.preset,
            session: self,
            input: None,
            output: None,
        }
    }

    /// Whether both an input and an output are attached.
    pub const fn is_configured(&self) -> bool {
        self.output.is_some() && (self.input.is_some() || self.running.is_some())
    }

    /// Whether the capture thread is alive: started, not stopped, and not
    /// ended on its own.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.finished.load(Ordering::Acquire))
    }

    /// Register the handler told about capture ending on its own.
    pub fn set_exit_handler(&mut self, handler: ExitHandler) {
        self.exit_handler = Some(handler);
    }

    /// Current preset.
    pub const fn preset(&self) -> SessionPreset {
        self.preset
    }

    /// Format negotiated with the driver at the last commit.
    pub const fn active_format(&self) -> Option<&Format> {
        self.active_format.as_ref()
    }

    /// Frame flow counters.
    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    /// Start capturing and delivering frames. Returns whether a new capture
    /// was started: `false` if already running or if the session has no
    /// input or output. A capture thread that ended on its own is joined
    /// first.
    pub fn start_running(&mut self) -> Result<bool> {
        if self.is_running() {
            trace!("capture session already running");
            return Ok(false);
        }
        self.stop_running();
        let Some(output) = self.output.as_ref() else {
            debug!("no frame output attached, nothing to start");
            return Ok(false);
        };
        let settings = LoopSettings {
            buffer_count: output.buffer_count,
            discard_late_frames: output.discard_late_frames,
        };
        let handler = Arc::clone(&output.handler);
        let Some(mut input) = self.input.take() else {
            debug!("no camera input attached, nothing to start");
            return Ok(false);
        };

        let capacity = if settings.discard_late_frames {
            1
        } else {
            usize::try_from(settings.buffer_count).unwrap_or(1)
        };
        let (tx, rx) = channel::bounded(capacity);

        let delivery_stats = Arc::clone(&self.stats);
        let delivery = match thread::Builder::new()
            .name("video-data-output".to_owned())
            .spawn(move || deliver_frames(&rx, handler.as_ref(), &delivery_stats))
        {
            Ok(delivery) => delivery,
            Err(err) => {
                self.input = Some(input);
                return Err(CameraError::Io(err));
            }
        };

        let running = Arc::new(AtomicBool::new(true));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&running);
        let done = Arc::clone(&finished);
        let on_exit = self.exit_handler.clone();
        let capture_stats = Arc::clone(&self.stats);
        let capture = thread::Builder::new()
            .name("capture-session".to_owned())
            .spawn(move || {
                let exit = capture_frames(&mut input.device, settings, &tx, &flag, &capture_stats);
                drop(tx);
                done.store(true, Ordering::Release);
                if let Some(exit) = exit {
                    warn!(%exit, "capture ended");
                    if let Some(on_exit) = on_exit {
                        on_exit(&exit);
                    }
                }
                input
            })
            .map_err(|err| {
                error!(%err, "failed to spawn capture thread, camera input released");
                CameraError::Io(err)
            })?;

        self.running = Some(RunningCapture {
            running,
            finished,
            capture,
            delivery,
        });
        info!(
            preset = ?self.preset,
            discard_late_frames = settings.discard_late_frames,
            "capture session started"
        );
        Ok(true)
    }

    /// Stop capturing. The frame being handled, and any frame already queued,
    /// is delivered before this returns. No-op if not running.
    pub fn stop_running(&mut self) {
        let Some(running) = self.running.take() else {
            trace!("capture session already stopped");
            return;
        };

        running.running.store(false, Ordering::Release);
        match running.capture.join() {
            Ok(input) => self.input = Some(input),
            Err(_) => error!("capture thread panicked, camera input lost"),
        }
        if running.delivery.join().is_err() {
            error!("frame delivery thread panicked");
        }

        let stats = self.stats();
        info!(
            captured = stats.captured,
            delivered = stats.delivered,
            dropped = stats.dropped,
            errors = stats.errors,
            "capture session stopped"
        );
    }
}

impl<D: CameraDevice + Send + 'static> Drop for CaptureSession<D> {
    fn drop(&mut self) {
        self.stop_running();
    }
}

impl<D: CameraDevice + Send + 'static> fmt::Debug for CaptureSession<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSession")
            .field("preset", &self.preset)
            .field("configured", &self.is_configured())
            .field("running", &self.is_running())
            .field("active_format", &self.active_format)
            .finish_non_exhaustive()
    }
}

/// Staged session changes, applied all at once by [`commit`](Self::commit).
///
/// Dropping the transaction discards everything staged.
pub struct SessionConfiguration<'s, D: CameraDevice + Send + 'static> {
    session: &'s mut CaptureSession<D>,
    preset: SessionPreset,
    input: Option<CaptureInput<D>>,
    output: Option<FrameOutput>,
}

impl<D: CameraDevice + Send + 'static> SessionConfiguration<'_, D> {
    /// Stage a resolution preset.
    pub fn set_preset(&mut self, preset: SessionPreset) {
        self.preset = preset;
    }

    /// Whether `input` could be attached: the session is stopped, has no
    /// input yet, and the device both captures and streams.
    pub fn can_add_input(&self, input: &CaptureInput<D>) -> bool {
        self.session.running.is_none()
            && self.session.input.is_none()
            && self.input.is_none()
            && input.capabilities().is_video_source()
    }

    /// Stage `input`. Returns `false` and drops it if `can_add_input` refuses.
    pub fn add_input(&mut self, input: CaptureInput<D>) -> bool {
        if !self.can_add_input(&input) {
            return false;
        }
        self.input = Some(input);
        true
    }

    /// Whether an output could be attached: the session is stopped and has
    /// no output yet.
    pub fn can_add_output(&self, _output: &FrameOutput) -> bool {
        self.session.running.is_none() && self.session.output.is_none() && self.output.is_none()
    }

    /// Stage `output`. Returns `false` and drops it if `can_add_output` refuses.
    pub fn add_output(&mut self, output: FrameOutput) -> bool {
        if !self.can_add_output(&output) {
            return false;
        }
        self.output = Some(output);
        true
    }

    /// Apply staged changes.
    ///
    /// The preset is negotiated with the input device here. If the driver
    /// answers with a non-YUYV format or anything larger than the preset,
    /// nothing is applied and the staged input and output are dropped.
    pub fn commit(mut self) -> Result<Option<Format>> {
        if self.session.running.is_some() {
            return Err(CameraError::SessionRunning);
        }

        let requested = self.preset.format();
        let negotiated = match (self.input.as_mut(), self.session.input.as_mut()) {
            (Some(input), _) | (None, Some(input)) => {
                Some(negotiate(&mut input.device, &requested)?)
            }
            (None, None) => None,
        };

        let session = self.session;
        session.preset = self.preset;
        if let Some(input) = self.input.take() {
            session.input = Some(input);
        }
        if let Some(output) = self.output.take() {
            session.output = Some(output);
        }
        if negotiated.is_some() {
            session.active_format.clone_from(&negotiated);
        }

        debug!(preset = ?session.preset, format = ?negotiated, "session configuration committed");
        Ok(negotiated)
    }
}

fn negotiate<D: CameraDevice>(device: &mut D, requested: &Format) -> Result<Format> {
    let actual = device.set_format(requested)?;
    if actual.fourcc != FourCC::YUYV || !actual.fits_within(requested.width, requested.height) {
        warn!(?requested, ?actual, "driver refused capture preset");
        return Err(CameraError::FormatNotSupported(actual));
    }
    Ok(actual)
}

#[derive(Debug, Clone, Copy)]
struct LoopSettings {
    buffer_count: u32,
    discard_late_frames: bool,
}

/// Returns `None` when asked to stop, otherwise why capture ended.
fn capture_frames<D: CameraDevice>(
    device: &mut D,
    settings: LoopSettings,
    tx: &Sender<Frame>,
    running: &AtomicBool,
    stats: &DeliveryStats,
) -> Option<CaptureExit> {
    let mut stream = match device.create_stream(settings.buffer_count) {
        Ok(stream) => stream,
        Err(err) => {
            error!(%err, "failed to create capture stream");
            return Some(CaptureExit::StreamFailed(err.to_string()));
        }
    };

    let mut consecutive_errors = 0u32;
    while running.load(Ordering::Acquire) {
        let frame = match stream.next_frame() {
            Ok(frame) => {
                consecutive_errors = 0;
                frame
            }
            Err(CameraError::EndOfStream) => {
                debug!("capture stream ended");
                return Some(CaptureExit::EndOfStream);
            }
            Err(err) => {
                stats.errors.fetch_add(1, Ordering::Relaxed);
                consecutive_errors += 1;
                warn!(%err, consecutive_errors, "frame capture failed");
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    error!(consecutive_errors, "too many capture errors, stopping capture");
                    return Some(CaptureExit::TooManyErrors(consecutive_errors));
                }
                continue;
            }
        };
        stats.captured.fetch_add(1, Ordering::Relaxed);

        if settings.discard_late_frames {
            match tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(frame)) => {
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(
                        sequence = frame.metadata.sequence,
                        "delivery busy, discarding late frame"
                    );
                }
                Err(TrySendError::Disconnected(_)) => break,
            }
        } else if tx.send(frame).is_err() {
            break;
        }
    }
    None
}

fn deliver_frames(rx: &Receiver<Frame>, handler: &dyn FrameHandler, stats: &DeliveryStats) {
    for frame in rx {
        handler.on_frame(&frame);
        stats.delivered.fetch_add(1, Ordering::Relaxed);
    }
    trace!("frame delivery drained");
}
