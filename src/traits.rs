//! Core traits and types for the capture side of the pipeline.

use std::time::Duration;
use thiserror::Error;

/// Pixel format representation (e.g., YUYV, MJPG).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a new format specification.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let stride = width * 2; // YUYV is 2 bytes per pixel
        let size = stride * height;
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }

    /// Whether this format fits inside `width` x `height`.
    #[must_use]
    pub const fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width <= width && self.height <= height
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

impl DeviceCapabilities {
    /// A device is usable as a session input only if it captures and streams.
    #[must_use]
    pub const fn is_video_source(&self) -> bool {
        self.can_capture && self.can_stream
    }
}

/// Metadata for a captured frame.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// A captured video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame data.
    pub data: Vec<u8>,
    /// Format the frame was captured in.
    pub format: Format,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl Frame {
    /// Extract the pixel buffer backing this frame.
    ///
    /// Returns `None` when the frame cannot be interpreted as a YUYV image:
    /// a non-YUYV pixel format, zero dimensions, or less data than the
    /// format requires. Such frames are expected occasionally (truncated
    /// driver buffers, compressed formats) and callers skip them.
    #[must_use]
    pub fn pixel_buffer(&self) -> Option<PixelBuffer<'_>> {
        let format = &self.format;
        if format.fourcc != FourCC::YUYV || format.width == 0 || format.height == 0 {
            return None;
        }

        let stride = format.stride.max(format.width * 2);
        let required = usize::try_from(u64::from(stride) * u64::from(format.height)).ok()?;
        if self.data.len() < required {
            return None;
        }

        Some(PixelBuffer {
            data: &self.data,
            width: format.width,
            height: format.height,
            stride,
        })
    }
}

/// Borrowed view of a YUYV image inside a [`Frame`].
#[derive(Debug, Clone, Copy)]
pub struct PixelBuffer<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    stride: u32,
}

impl PixelBuffer<'_> {
    /// Image width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Get RGB values for a pixel at the specified coordinates.
    ///
    /// Returns `None` if the coordinates are outside the image. For odd x
    /// coordinates the Y value of the second pixel in the pair is used with
    /// the shared U/V values.
    #[must_use]
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }

        // YUYV format: [Y0 U Y1 V] repeats
        let pair_x = x & !1;
        let offset = usize::try_from(u64::from(y) * u64::from(self.stride) + u64::from(pair_x) * 2)
            .ok()?;

        let y_val = if x % 2 == 0 {
            *self.data.get(offset)?
        } else {
            *self.data.get(offset + 2)?
        };
        let u = *self.data.get(offset + 1)?;
        let v = *self.data.get(offset + 3)?;

        Some(yuv_to_rgb(y_val, u, v))
    }
}

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 conversion formula. RGB values are clamped to 0-255.
#[must_use]
#[allow(clippy::many_single_char_names)]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    let clamp = |val: f32| -> u8 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            val.clamp(0.0, 255.0) as u8
        }
    };

    (clamp(r), clamp(g), clamp(b))
}

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Device with given index was not found.
    #[error("Device {0} not found")]
    DeviceNotFound(u32),
    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// Requested format is not supported.
    #[error("Format not supported: {0:?}")]
    FormatNotSupported(Format),
    /// Error during streaming operation.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// The stream has no more frames to deliver.
    #[error("End of stream")]
    EndOfStream,
    /// The session must be stopped before it can be reconfigured.
    #[error("Capture session is running")]
    SessionRunning,
    /// Operation timed out.
    #[error("Operation timed out")]
    Timeout,
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Abstraction over camera device operations.
pub trait CameraDevice {
    /// The stream type returned by `create_stream`.
    type Stream<'a>: CaptureStream
    where
        Self: 'a;

    /// Get device capabilities.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Get current format.
    fn format(&self) -> Result<Format>;

    /// Set capture format. Returns the actual format set by the driver.
    fn set_format(&mut self, format: &Format) -> Result<Format>;

    /// Create a capture stream with the specified number of buffers.
    fn create_stream(&mut self, buffer_count: u32) -> Result<Self::Stream<'_>>;
}

/// Abstraction over capture stream operations.
pub trait CaptureStream {
    /// Capture the next frame from the stream.
    fn next_frame(&mut self) -> Result<Frame>;
}

/// Source of the camera device a session should capture from.
pub trait DeviceProvider {
    /// Device type handed to the capture session.
    type Device: CameraDevice + Send + 'static;

    /// Return the device to capture from, or `None` if no usable camera exists.
    fn default_device(&self) -> Result<Option<Self::Device>>;
}
