use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::os::raw::{c_int, c_ulong, c_void};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::time::Duration;

use tracing::{debug, warn};
use v4l::buffer::Type;
use v4l::format::Format;
use v4l::memory::Memory;
use v4l::v4l_sys::{
    V4L2_FBUF_FLAG_GLOBAL_ALPHA, V4L2_FBUF_FLAG_OVERLAY, v4l2_buffer, v4l2_control, v4l2_crop,
    v4l2_format, v4l2_framebuffer, v4l2_output, v4l2_rect, v4l2_requestbuffers, v4l2_window,
};
use v4l::v4l2::{self, vidioc};
use v4l::video::Output;
use v4l::{Device, FourCC};

use super::{
    BufferKind, BufferLayout, DeviceCapabilities, DeviceInfo, OutputDevice, OutputInfo,
    OverlayWindow, PixFormat,
};
use crate::error::SessionError;
use crate::format::{CropWindow, FourCc};

/// Video-output device node.
///
/// Capabilities and the output format go through `v4l`'s typed API; the
/// overlay, crop and buffer-queue requests it doesn't wrap are issued as raw
/// ioctls with its kernel structs.
pub struct V4l2Output {
    device: Device,
    path: PathBuf,
}

impl V4l2Output {
    /// Opens the node read/write and non-blocking, so dequeue never sleeps in
    /// the kernel.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref().to_path_buf();
        let device = Device::with_path(&path)
            .map_err(|source| SessionError::DeviceOpen { path: path.clone(), source })?;
        debug!(path = %path.display(), "Opened output device");
        Ok(Self { device, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> RawFd {
        self.device.handle().fd()
    }

    fn ioctl<T>(&self, request: c_ulong, arg: &mut T) -> io::Result<()> {
        xioctl(self.fd(), request, arg)
    }

    fn buffer(index: u32) -> v4l2_buffer {
        let mut buf: v4l2_buffer = zeroed();
        buf.index = index;
        buf.type_ = Type::VideoOutput as u32;
        buf.memory = Memory::Mmap as u32;
        buf
    }

    fn stream_request(&self, request: c_ulong) -> io::Result<()> {
        let mut kind = Type::VideoOutput as c_int;
        self.ioctl(request, &mut kind)
    }
}

/// Issues an ioctl, restarting when interrupted by a signal.
pub(crate) fn xioctl<T>(fd: RawFd, request: c_ulong, arg: &mut T) -> io::Result<()> {
    loop {
        // SAFETY: `arg` is the kernel struct matching `request`'s encoded
        // size, and stays borrowed for the duration of the call.
        let result = unsafe { v4l2::ioctl(fd, request as _, (arg as *mut T).cast::<c_void>()) };
        match result {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// All-zero value of a kernel request struct.
fn zeroed<T>() -> T {
    // SAFETY: only instantiated with the plain-data `v4l_sys` structs, for
    // which the all-zero pattern (null pointers, zero integers) is valid.
    unsafe { mem::zeroed() }
}

/// NUL-terminated byte field to `String`.
fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn buffer_type(kind: BufferKind) -> Type {
    match kind {
        BufferKind::Output => Type::VideoOutput,
        BufferKind::OutputOverlay => Type::VideoOutputOverlay,
    }
}

fn rect(window: CropWindow) -> v4l2_rect {
    v4l2_rect {
        left: window.left as i32,
        top: window.top as i32,
        width: window.width,
        height: window.height,
    }
}

fn fourcc(code: FourCc) -> FourCC {
    FourCC::new(&code.0.to_le_bytes())
}

impl OutputDevice for V4l2Output {
    type Mapping = MmapRegion;

    fn query_capabilities(&mut self) -> io::Result<DeviceInfo> {
        let caps = self.device.query_caps()?;
        Ok(DeviceInfo {
            driver: caps.driver,
            card: caps.card,
            capabilities: DeviceCapabilities::from_bits_retain(caps.capabilities.bits()),
        })
    }

    fn set_output(&mut self, index: u32) -> io::Result<()> {
        let mut index = index as c_int;
        self.ioctl(vidioc::VIDIOC_S_OUTPUT, &mut index)
    }

    fn enumerate_output(&mut self, index: u32) -> io::Result<OutputInfo> {
        let mut output: v4l2_output = zeroed();
        output.index = index;
        self.ioctl(vidioc::VIDIOC_ENUMOUTPUT, &mut output)?;
        Ok(OutputInfo {
            index: output.index,
            name: c_string(&output.name),
        })
    }

    fn enable_overlay_framebuffer(&mut self) -> io::Result<()> {
        let mut fb: v4l2_framebuffer = zeroed();
        fb.flags = V4L2_FBUF_FLAG_OVERLAY | V4L2_FBUF_FLAG_GLOBAL_ALPHA;
        self.ioctl(vidioc::VIDIOC_S_FBUF, &mut fb)
    }

    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()> {
        let mut ctrl = v4l2_control { id, value };
        self.ioctl(vidioc::VIDIOC_S_CTRL, &mut ctrl)
    }

    fn set_crop(&mut self, kind: BufferKind, crop: CropWindow) -> io::Result<()> {
        let mut req: v4l2_crop = zeroed();
        req.type_ = buffer_type(kind) as u32;
        req.c = rect(crop);
        self.ioctl(vidioc::VIDIOC_S_CROP, &mut req)
    }

    fn set_format(&mut self, format: &PixFormat) -> io::Result<()> {
        let mut fmt = Format::new(format.width, format.height, fourcc(format.pixel_format));
        fmt.stride = format.bytes_per_line;
        fmt.size = format.size_image;
        Output::set_format(&self.device, &fmt)?;
        Ok(())
    }

    fn get_format(&mut self) -> io::Result<PixFormat> {
        let fmt = Output::format(&self.device)?;
        Ok(PixFormat {
            width: fmt.width,
            height: fmt.height,
            pixel_format: FourCc(u32::from_le_bytes(fmt.fourcc.repr)),
            bytes_per_line: fmt.stride,
            size_image: fmt.size,
        })
    }

    fn set_overlay_window(&mut self, window: &OverlayWindow) -> io::Result<()> {
        let mut win: v4l2_window = zeroed();
        win.w = rect(window.window);
        win.chromakey = window.chromakey;
        win.global_alpha = window.global_alpha;
        let mut fmt: v4l2_format = zeroed();
        fmt.type_ = Type::VideoOutputOverlay as u32;
        fmt.fmt.win = win;
        self.ioctl(vidioc::VIDIOC_S_FMT, &mut fmt)
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let mut req: v4l2_requestbuffers = zeroed();
        req.count = count;
        req.type_ = Type::VideoOutput as u32;
        req.memory = Memory::Mmap as u32;
        self.ioctl(vidioc::VIDIOC_REQBUFS, &mut req)?;
        Ok(req.count)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferLayout> {
        let mut buf = Self::buffer(index);
        self.ioctl(vidioc::VIDIOC_QUERYBUF, &mut buf)?;
        Ok(BufferLayout {
            index,
            // SAFETY: MMAP buffers report their mmap offset in `m.offset`.
            offset: unsafe { buf.m.offset },
            length: buf.length as usize,
        })
    }

    fn map_buffer(&mut self, layout: BufferLayout) -> io::Result<MmapRegion> {
        MmapRegion::map(self.fd(), layout.offset, layout.length)
    }

    fn queue_buffer(&mut self, index: u32, timestamp: Duration) -> io::Result<()> {
        let mut buf = Self::buffer(index);
        buf.timestamp.tv_sec = timestamp.as_secs() as _;
        buf.timestamp.tv_usec = timestamp.subsec_micros() as _;
        self.ioctl(vidioc::VIDIOC_QBUF, &mut buf)
    }

    fn dequeue_buffer(&mut self) -> io::Result<u32> {
        let mut buf = Self::buffer(0);
        self.ioctl(vidioc::VIDIOC_DQBUF, &mut buf)?;
        Ok(buf.index)
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.stream_request(vidioc::VIDIOC_STREAMON)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.stream_request(vidioc::VIDIOC_STREAMOFF)
    }
}

/// Shared read/write mapping of one device buffer. Unmapped on drop.
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl MmapRegion {
    fn map(fd: RawFd, offset: u32, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "zero-length buffer"));
        }
        // SAFETY: fresh shared mapping of a device region; the kernel picks the
        // address and validates `offset`/`len` against the buffer it describes.
        let ptr = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )?
        };
        NonNull::new(ptr.cast::<u8>())
            .map(|ptr| Self { ptr, len })
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for MmapRegion {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: `ptr` maps `len` bytes for as long as `self` lives.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl AsMut<[u8]> for MmapRegion {
    fn as_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` makes the view exclusive.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: unmaps exactly the region created in `map`.
        if let Err(err) = unsafe { v4l2::munmap(self.ptr.as_ptr().cast(), self.len) } {
            warn!(len = self.len, %err, "munmap failed");
        }
    }
}
