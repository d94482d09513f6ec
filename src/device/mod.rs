//! Kernel boundaries: the video-output device and the display it overlays.
//!
//! [`OutputDevice`] speaks in terms of the handful of requests a streaming
//! output needs (capabilities, format, crop, buffer pool, queue/dequeue,
//! stream on/off). [`V4l2Output`] issues them as ioctls against a device node;
//! tests drive the same trait with a scripted fake.

use std::io;
use std::time::Duration;

use bitflags::bitflags;

use crate::format::{CropWindow, FourCc};

mod fb;
pub(crate) mod sys;
mod v4l2;

pub use fb::Framebuffer;
pub use v4l2::{MmapRegion, V4l2Output};

bitflags! {
    /// Capability bits reported by the device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceCapabilities: u32 {
        const VIDEO_CAPTURE = 0x0000_0001;
        const VIDEO_OUTPUT = 0x0000_0002;
        const VIDEO_OVERLAY = 0x0000_0004;
        const VIDEO_OUTPUT_OVERLAY = 0x0000_0200;
        const READWRITE = 0x0100_0000;
        const STREAMING = 0x0400_0000;
        const DEVICE_CAPS = 0x8000_0000;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub driver: String,
    pub card: String,
    pub capabilities: DeviceCapabilities,
}

/// Which queue a crop or format request addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Output,
    OutputOverlay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    pub index: u32,
    pub name: String,
}

/// Single-planar pixel format as exchanged with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: FourCc,
    pub bytes_per_line: u32,
    pub size_image: u32,
}

/// Geometry and blending of the overlay window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayWindow {
    pub window: CropWindow,
    pub chromakey: u32,
    pub global_alpha: u8,
}

/// Where a device buffer lives in the device's mmap space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub index: u32,
    pub offset: u32,
    pub length: usize,
}

/// Requests a streaming video-output device must answer.
///
/// Every method maps onto one device call. Failures are surfaced as raw
/// `io::Error`s; callers decide which ones are fatal.
pub trait OutputDevice {
    /// Process-side view of one mapped buffer.
    type Mapping: AsRef<[u8]> + AsMut<[u8]>;

    fn query_capabilities(&mut self) -> io::Result<DeviceInfo>;

    fn set_output(&mut self, index: u32) -> io::Result<()>;

    fn enumerate_output(&mut self, index: u32) -> io::Result<OutputInfo>;

    /// Switches the framebuffer into overlay mode with global alpha.
    fn enable_overlay_framebuffer(&mut self) -> io::Result<()>;

    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()>;

    fn set_crop(&mut self, kind: BufferKind, crop: CropWindow) -> io::Result<()>;

    fn set_format(&mut self, format: &PixFormat) -> io::Result<()>;

    fn get_format(&mut self) -> io::Result<PixFormat>;

    fn set_overlay_window(&mut self, window: &OverlayWindow) -> io::Result<()>;

    /// Asks for `count` memory-mapped output buffers and returns how many the
    /// device granted. A count of zero releases the pool.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferLayout>;

    fn map_buffer(&mut self, layout: BufferLayout) -> io::Result<Self::Mapping>;

    /// Hands buffer `index` to the device stamped with `timestamp`.
    fn queue_buffer(&mut self, index: u32, timestamp: Duration) -> io::Result<()>;

    /// Takes back a buffer the device finished with. `WouldBlock` means
    /// nothing is ready yet.
    fn dequeue_buffer(&mut self) -> io::Result<u32>;

    fn stream_on(&mut self) -> io::Result<()>;

    fn stream_off(&mut self) -> io::Result<()>;
}

/// Resolution of the display the output is composited onto.
pub trait DisplayGeometry {
    fn resolution(&mut self) -> io::Result<(u32, u32)>;
}

/// `WouldBlock`-style failures that clear up by waiting.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    )
}
