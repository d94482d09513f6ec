//! Scripted stand-ins for the device, display and clock.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use crate::clock::Clock;
use crate::device::{
    BufferKind, BufferLayout, DeviceCapabilities, DeviceInfo, DisplayGeometry, OutputDevice,
    OutputInfo, OverlayWindow, PixFormat,
};
use crate::format::{CropWindow, DEVICE_YUV422P, FourCc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    QueryCapabilities,
    SetOutput,
    EnumerateOutput,
    EnableOverlayFramebuffer,
    SetControl,
    SetCrop,
    SetFormat,
    GetFormat,
    SetOverlayWindow,
    RequestBuffers,
    QueryBuffer,
    MapBuffer,
    Queue,
    Dequeue,
    StreamOn,
    StreamOff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    QueryCapabilities,
    SetOutput(u32),
    EnumerateOutput(u32),
    EnableOverlayFramebuffer,
    SetControl(u32, i32),
    SetCrop(BufferKind, CropWindow),
    SetFormat(PixFormat),
    GetFormat,
    SetOverlayWindow(OverlayWindow),
    RequestBuffers(u32),
    QueryBuffer(u32),
    MapBuffer(u32),
    Queue(u32, Duration),
    Dequeue,
    StreamOn,
    StreamOff,
}

impl Call {
    pub fn op(&self) -> Op {
        match self {
            Call::QueryCapabilities => Op::QueryCapabilities,
            Call::SetOutput(_) => Op::SetOutput,
            Call::EnumerateOutput(_) => Op::EnumerateOutput,
            Call::EnableOverlayFramebuffer => Op::EnableOverlayFramebuffer,
            Call::SetControl(..) => Op::SetControl,
            Call::SetCrop(..) => Op::SetCrop,
            Call::SetFormat(_) => Op::SetFormat,
            Call::GetFormat => Op::GetFormat,
            Call::SetOverlayWindow(_) => Op::SetOverlayWindow,
            Call::RequestBuffers(_) => Op::RequestBuffers,
            Call::QueryBuffer(_) => Op::QueryBuffer,
            Call::MapBuffer(_) => Op::MapBuffer,
            Call::Queue(..) => Op::Queue,
            Call::Dequeue => Op::Dequeue,
            Call::StreamOn => Op::StreamOn,
            Call::StreamOff => Op::StreamOff,
        }
    }
}

/// In-memory output device. Buffers are plain vectors; queued buffers come
/// back in FIFO order unless `lifo` is set.
pub struct FakeDevice {
    pub calls: Vec<Call>,
    pub capabilities: DeviceCapabilities,
    /// Buffers granted per request; `None` grants what was asked.
    pub grant: Option<u32>,
    /// Length reported for every buffer; `None` uses the format's image size.
    pub buffer_len: Option<usize>,
    /// Width/height the device forces on `set_format`.
    pub adjust: Option<(u32, u32)>,
    /// Pixel format the device substitutes on `set_format`.
    pub substitute: Option<FourCc>,
    /// Ops that fail with `EIO`.
    pub failing: Vec<Op>,
    /// Fail `MapBuffer` from this index on.
    pub fail_map_from: Option<u32>,
    /// Dequeue polls answered with `EAGAIN` before a buffer is handed back.
    pub busy_polls: u32,
    /// Every dequeue answers `EAGAIN`.
    pub stalled: bool,
    /// Dequeue returns this index instead of a queued one.
    pub bogus_index: Option<u32>,
    pub lifo: bool,
    pub format: Option<PixFormat>,
    pub queued: VecDeque<u32>,
    pub granted: u32,
    pub streaming: bool,
}

impl FakeDevice {
    pub fn new(capabilities: DeviceCapabilities) -> Self {
        Self {
            calls: Vec::new(),
            capabilities,
            grant: None,
            buffer_len: None,
            adjust: None,
            substitute: None,
            failing: Vec::new(),
            fail_map_from: None,
            busy_polls: 0,
            stalled: false,
            bogus_index: None,
            lifo: false,
            format: None,
            queued: VecDeque::new(),
            granted: 0,
            streaming: false,
        }
    }

    pub fn output() -> Self {
        Self::new(DeviceCapabilities::VIDEO_OUTPUT | DeviceCapabilities::STREAMING)
    }

    pub fn overlay() -> Self {
        Self::new(
            DeviceCapabilities::VIDEO_OUTPUT
                | DeviceCapabilities::VIDEO_OUTPUT_OVERLAY
                | DeviceCapabilities::STREAMING,
        )
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls.iter().filter(|c| c.op() == op).count()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.calls.iter().map(Call::op).collect()
    }

    fn record(&mut self, call: Call) -> io::Result<()> {
        let op = call.op();
        self.calls.push(call);
        if self.failing.contains(&op) {
            Err(io::Error::from_raw_os_error(libc::EIO))
        } else {
            Ok(())
        }
    }
}

impl OutputDevice for FakeDevice {
    type Mapping = Vec<u8>;

    fn query_capabilities(&mut self) -> io::Result<DeviceInfo> {
        self.record(Call::QueryCapabilities)?;
        Ok(DeviceInfo {
            driver: "fake".into(),
            card: "Fake Output".into(),
            capabilities: self.capabilities,
        })
    }

    fn set_output(&mut self, index: u32) -> io::Result<()> {
        self.record(Call::SetOutput(index))
    }

    fn enumerate_output(&mut self, index: u32) -> io::Result<OutputInfo> {
        self.record(Call::EnumerateOutput(index))?;
        Ok(OutputInfo { index, name: format!("output{index}") })
    }

    fn enable_overlay_framebuffer(&mut self) -> io::Result<()> {
        self.record(Call::EnableOverlayFramebuffer)
    }

    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()> {
        self.record(Call::SetControl(id, value))
    }

    fn set_crop(&mut self, kind: BufferKind, crop: CropWindow) -> io::Result<()> {
        self.record(Call::SetCrop(kind, crop))
    }

    fn set_format(&mut self, format: &PixFormat) -> io::Result<()> {
        self.record(Call::SetFormat(*format))?;
        let (width, height) = self.adjust.unwrap_or((format.width, format.height));
        let pixel_format = self.substitute.unwrap_or(format.pixel_format);
        let luma = (width * height) as usize;
        let size_image = if pixel_format == DEVICE_YUV422P { luma * 2 } else { luma * 3 / 2 };
        self.format = Some(PixFormat {
            width,
            height,
            pixel_format,
            bytes_per_line: width,
            size_image: size_image as u32,
        });
        Ok(())
    }

    fn get_format(&mut self) -> io::Result<PixFormat> {
        self.record(Call::GetFormat)?;
        self.format
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))
    }

    fn set_overlay_window(&mut self, window: &OverlayWindow) -> io::Result<()> {
        self.record(Call::SetOverlayWindow(*window))
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        self.record(Call::RequestBuffers(count))?;
        self.granted = if count == 0 { 0 } else { self.grant.unwrap_or(count) };
        self.queued.clear();
        Ok(self.granted)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferLayout> {
        self.record(Call::QueryBuffer(index))?;
        let length = self
            .buffer_len
            .or_else(|| self.format.map(|f| f.size_image as usize))
            .unwrap_or(4096);
        Ok(BufferLayout { index, offset: index * 0x10_0000, length })
    }

    fn map_buffer(&mut self, layout: BufferLayout) -> io::Result<Vec<u8>> {
        self.record(Call::MapBuffer(layout.index))?;
        if self.fail_map_from.is_some_and(|from| layout.index >= from) {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        Ok(vec![0; layout.length])
    }

    fn queue_buffer(&mut self, index: u32, timestamp: Duration) -> io::Result<()> {
        self.record(Call::Queue(index, timestamp))?;
        self.queued.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> io::Result<u32> {
        self.record(Call::Dequeue)?;
        if self.stalled || !self.streaming {
            return Err(io::Error::from_raw_os_error(libc::EAGAIN));
        }
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            return Err(io::Error::from_raw_os_error(libc::EAGAIN));
        }
        if let Some(index) = self.bogus_index {
            return Ok(index);
        }
        let next = if self.lifo { self.queued.pop_back() } else { self.queued.pop_front() };
        next.ok_or_else(|| io::Error::from_raw_os_error(libc::EAGAIN))
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.record(Call::StreamOn)?;
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.record(Call::StreamOff)?;
        self.streaming = false;
        self.queued.clear();
        Ok(())
    }
}

pub struct FakeDisplay {
    pub resolution: (u32, u32),
    pub queries: u32,
    pub fail: bool,
}

impl FakeDisplay {
    pub fn new(width: u32, height: u32) -> Self {
        Self { resolution: (width, height), queries: 0, fail: false }
    }
}

impl DisplayGeometry for FakeDisplay {
    fn resolution(&mut self) -> io::Result<(u32, u32)> {
        self.queries += 1;
        if self.fail {
            return Err(io::Error::from_raw_os_error(libc::ENOTTY));
        }
        Ok(self.resolution)
    }
}

/// Virtual clock: `sleep` advances time and is recorded, never blocks.
#[derive(Default)]
pub struct ManualClock {
    now: RefCell<Duration>,
    pub sleeps: RefCell<Vec<Duration>>,
}

impl ManualClock {
    pub fn slept(&self) -> Duration {
        self.sleeps.borrow().iter().sum()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        let mut now = self.now.borrow_mut();
        *now += Duration::from_micros(1);
        *now
    }

    fn sleep(&self, duration: Duration) {
        *self.now.borrow_mut() += duration;
        self.sleeps.borrow_mut().push(duration);
    }
}
