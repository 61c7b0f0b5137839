//! V4L2 device implementation using the v4l crate.

use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{
    CameraDevice, CameraError, CaptureStream, DeviceCapabilities, DeviceProvider, Format, FourCC,
    Frame, FrameMetadata, Result,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Highest `/dev/videoN` index scanned when no device is configured.
const MAX_SCANNED_DEVICES: u32 = 16;

/// Path of the device node for a V4L2 index.
#[must_use]
pub fn device_node(index: u32) -> PathBuf {
    PathBuf::from(format!("/dev/video{index}"))
}

/// V4L2 device implementation wrapping the v4l crate.
pub struct V4L2Device {
    device: Device,
    index: u32,
    capabilities: DeviceCapabilities,
}

impl V4L2Device {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: u32) -> Result<Self> {
        let node = device_node(index);
        if !node.exists() {
            return Err(CameraError::DeviceNotFound(index));
        }

        let device = Device::new(index as usize)
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };

        Ok(Self {
            device,
            index,
            capabilities,
        })
    }

    /// Index of the underlying `/dev/videoN` node.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }
}

impl CameraDevice for V4L2Device {
    type Stream<'a> = V4L2Stream<'a>;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn format(&self) -> Result<Format> {
        let fmt = self
            .device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        Ok(Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            stride: fmt.stride,
            size: fmt.size,
        })
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        let mut fmt = self
            .device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        Ok(Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            stride: fmt.stride,
            size: fmt.size,
        })
    }

    fn create_stream(&mut self, buffer_count: u32) -> Result<Self::Stream<'_>> {
        let format = self.format()?;
        let stream = Stream::with_buffers(&self.device, Type::VideoCapture, buffer_count)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        Ok(V4L2Stream { stream, format })
    }
}

/// V4L2 capture stream wrapping mmap-based streaming.
pub struct V4L2Stream<'a> {
    stream: Stream<'a>,
    format: Format,
}

impl CaptureStream for V4L2Stream<'_> {
    fn next_frame(&mut self) -> Result<Frame> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        // Safe conversions: V4L2 timestamps are always non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = meta.timestamp.sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

        let used = usize::try_from(meta.bytesused).map_or(buf.len(), |used| used.min(buf.len()));
        let data = buf.get(..used).unwrap_or(buf).to_vec();

        Ok(Frame {
            data,
            format: self.format.clone(),
            metadata: FrameMetadata {
                sequence: meta.sequence,
                timestamp: Duration::new(secs, nanos),
                bytes_used: meta.bytesused,
            },
        })
    }
}

/// Picks the V4L2 node a session captures from.
///
/// With an explicit index only that node is considered. Otherwise nodes
/// `/dev/video0..16` are scanned and the first one that both captures and
/// streams wins; metadata-only nodes exposed by UVC drivers are skipped.
#[derive(Debug, Clone, Default)]
pub struct V4L2Provider {
    index: Option<u32>,
}

impl V4L2Provider {
    /// Create a provider, optionally pinned to one device index.
    #[must_use]
    pub const fn new(index: Option<u32>) -> Self {
        Self { index }
    }

    /// Device node the permission check should look at: the pinned node, or
    /// the node [`default_device`](DeviceProvider::default_device) would pick.
    #[must_use]
    pub fn permission_node(&self) -> PathBuf {
        let index = self.index.unwrap_or_else(|| {
            let nodes: Vec<(u32, NodeState)> = (0..MAX_SCANNED_DEVICES)
                .map(|index| (index, NodeState::of(index)))
                .collect();
            pick_node(&nodes)
        });
        device_node(index)
    }
}

/// What opening one `/dev/videoN` node showed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    VideoSource,
    NotCapturing,
    Unopenable,
    Missing,
}

impl NodeState {
    fn of(index: u32) -> Self {
        match V4L2Device::open(index) {
            Ok(device) if device.capabilities().is_video_source() => Self::VideoSource,
            Ok(_) => Self::NotCapturing,
            Err(CameraError::DeviceNotFound(_)) => Self::Missing,
            Err(_) => Self::Unopenable,
        }
    }
}

/// The first capturing node. Without one, the first node that exists but
/// could not be opened, since that is the node access is missing for.
/// Node 0 when nothing exists.
fn pick_node(nodes: &[(u32, NodeState)]) -> u32 {
    let first = |wanted: NodeState| {
        nodes
            .iter()
            .find(|(_, state)| *state == wanted)
            .map(|(index, _)| *index)
    };
    first(NodeState::VideoSource)
        .or_else(|| first(NodeState::Unopenable))
        .unwrap_or(0)
}

impl DeviceProvider for V4L2Provider {
    type Device = V4L2Device;

    fn default_device(&self) -> Result<Option<V4L2Device>> {
        if let Some(index) = self.index {
            return match V4L2Device::open(index) {
                Ok(device) if device.capabilities().is_video_source() => Ok(Some(device)),
                Ok(_) | Err(CameraError::DeviceNotFound(_)) => Ok(None),
                Err(err) => Err(err),
            };
        }

        for index in 0..MAX_SCANNED_DEVICES {
            match V4L2Device::open(index) {
                Ok(device) if device.capabilities().is_video_source() => {
                    debug!(index, card = %device.capabilities().card, "selected camera device");
                    return Ok(Some(device));
                }
                Ok(_) => debug!(index, "skipping node without video capture"),
                Err(err) => debug!(index, %err, "skipping unavailable node"),
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_node_prefers_first_video_source() {
        let nodes = [
            (0, NodeState::NotCapturing),
            (1, NodeState::Unopenable),
            (2, NodeState::VideoSource),
            (3, NodeState::VideoSource),
        ];
        assert_eq!(pick_node(&nodes), 2);
    }

    #[test]
    fn test_pick_node_falls_back_to_unopenable_node() {
        let nodes = [
            (0, NodeState::Missing),
            (1, NodeState::NotCapturing),
            (4, NodeState::Unopenable),
        ];
        assert_eq!(pick_node(&nodes), 4);
    }

    #[test]
    fn test_pick_node_defaults_to_first_node() {
        let nodes = [(0, NodeState::Missing), (1, NodeState::NotCapturing)];
        assert_eq!(pick_node(&nodes), 0);
        assert_eq!(pick_node(&[]), 0);
    }

    #[test]
    fn test_pinned_permission_node() {
        let provider = V4L2Provider::new(Some(7));
        assert_eq!(provider.permission_node(), PathBuf::from("/dev/video7"));
    }

    #[test]
    fn test_unpinned_permission_node_matches_selected_device() {
        let provider = V4L2Provider::new(None);
        let node = provider.permission_node();
        match provider.default_device() {
            Ok(Some(device)) => assert_eq!(node, device_node(device.index())),
            _ => assert!((0..MAX_SCANNED_DEVICES).any(|index| node == device_node(index))),
        }
    }
}
