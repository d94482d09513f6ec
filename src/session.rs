//! Caller-owned output session: `negotiate -> configure -> present* -> close`.

use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::compositor::{SourcePlanes, WritableFrame};
use crate::device::{DisplayGeometry, Framebuffer, OutputDevice, V4l2Output};
use crate::error::{FrameError, SessionError};
use crate::format::{EffectiveFormat, FourCc, FrameFormat, PlanarFormat, VideoCaps};
use crate::negotiate::{Negotiated, OutputMode, negotiate_device, negotiate_format};
use crate::options::OutputOptions;
use crate::pool::BufferPool;
use crate::stream::StreamController;

/// Lifecycle of a session. Frames can only be presented while `Streaming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Uninitialized,
    Negotiated,
    Streaming,
    Stopped,
}

/// Frame handed over by the producer.
#[derive(Debug, Clone, Copy)]
pub enum Image<'a> {
    /// Already written in place through [`Session::writable_frame`].
    Direct,
    /// Needs copying into the free buffer.
    Planes {
        planes: SourcePlanes<'a>,
        width: usize,
        height: usize,
    },
}

struct ActiveStream<M> {
    format: EffectiveFormat,
    mode: OutputMode,
    pool: BufferPool<M>,
    controller: StreamController,
}

pub struct Session<D: OutputDevice, C: Clock = SystemClock> {
    device: D,
    clock: C,
    options: OutputOptions,
    state: StreamState,
    negotiated: Option<Negotiated>,
    stream: Option<ActiveStream<D::Mapping>>,
}

/// Opens the configured output and display nodes and negotiates the device.
pub fn open(options: OutputOptions) -> Result<Session<V4l2Output>, SessionError> {
    let mut display = Framebuffer::open(&options.display_device)?;
    let device = V4l2Output::open(&options.video_device)?;
    let mut session = Session::new(device, options);
    session.negotiate(&mut display)?;
    Ok(session)
}

impl<D: OutputDevice> Session<D> {
    pub fn new(device: D, options: OutputOptions) -> Self {
        Self::with_clock(device, options, SystemClock)
    }
}

impl<D: OutputDevice, C: Clock> Session<D, C> {
    pub fn with_clock(device: D, options: OutputOptions, clock: C) -> Self {
        Self {
            device,
            clock,
            options,
            state: StreamState::Uninitialized,
            negotiated: None,
            stream: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn options(&self) -> &OutputOptions {
        &self.options
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    #[cfg(test)]
    pub(crate) fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.negotiated.as_ref()
    }

    /// Format the device accepted for the current stream.
    pub fn effective_format(&self) -> Option<EffectiveFormat> {
        self.stream.as_ref().map(|s| s.format)
    }

    /// Output mode of the current stream, or of the device once negotiated.
    pub fn mode(&self) -> Option<OutputMode> {
        self.stream
            .as_ref()
            .map(|s| s.mode)
            .or_else(|| self.negotiated.as_ref().map(|n| n.mode))
    }

    pub fn pool(&self) -> Option<&BufferPool<D::Mapping>> {
        self.stream.as_ref().map(|s| &s.pool)
    }

    /// Queries capabilities and applies the crop window.
    pub fn negotiate<G>(&mut self, display: &mut G) -> Result<&Negotiated, SessionError>
    where
        G: DisplayGeometry + ?Sized,
    {
        if self.state != StreamState::Uninitialized {
            return Err(SessionError::InvalidState(self.state));
        }
        match negotiate_device(&mut self.device, display, &self.options) {
            Ok(negotiated) => {
                self.state = StreamState::Negotiated;
                Ok(self.negotiated.insert(negotiated))
            }
            Err(err) => {
                self.state = StreamState::Stopped;
                Err(err)
            }
        }
    }

    /// Capabilities offered for a producer format. Never touches the device.
    pub fn query_format(&self, tag: FourCc) -> VideoCaps {
        VideoCaps::for_tag(tag)
    }

    /// Sets the stream format, builds and primes the buffer pool, and starts
    /// streaming.
    ///
    /// An unrecognised `tag` fails before any device call, leaving a running
    /// stream untouched. Otherwise a running stream is torn down first. The
    /// display size, flags and title are informational: scaling to the crop
    /// window is done by the device.
    #[allow(clippy::too_many_arguments)]
    pub fn configure(
        &mut self,
        width: u32,
        height: u32,
        display_width: u32,
        display_height: u32,
        flags: u32,
        title: &str,
        tag: FourCc,
    ) -> Result<(), SessionError> {
        let negotiated_mode = match (self.state, &self.negotiated) {
            (StreamState::Negotiated | StreamState::Streaming, Some(n)) => n.mode,
            (state, _) => return Err(SessionError::InvalidState(state)),
        };
        let format = PlanarFormat::from_tag(tag).ok_or(SessionError::UnsupportedFormat(tag))?;
        if width == 0 || height == 0 {
            return Err(SessionError::InvalidDimensions { width, height });
        }
        info!(
            width,
            height,
            display_width,
            display_height,
            flags,
            title,
            format = %tag,
            "Configuring output"
        );

        if let Some(stream) = self.stream.take() {
            self.teardown(stream);
            self.state = StreamState::Negotiated;
        }

        let requested = FrameFormat { width, height, format };
        let (effective, mode) = negotiate_format(&mut self.device, negotiated_mode, requested)?;
        let pool = BufferPool::allocate(
            &mut self.device,
            self.options.buffer_count,
            effective.layout(),
            &self.clock,
        )?;

        let mut controller = StreamController::new(self.options.retry);
        if let Err(err) = controller.start(&mut self.device) {
            pool.release(&mut self.device);
            self.state = StreamState::Stopped;
            return Err(err);
        }

        self.stream = Some(ActiveStream {
            format: effective,
            mode,
            pool,
            controller,
        });
        self.state = StreamState::Streaming;
        Ok(())
    }

    /// Plane views into the free buffer for in-place (direct) rendering.
    ///
    /// After a timed-out presentation the process holds no free buffer; the
    /// pending dequeue is retried here before giving up.
    pub fn writable_frame(&mut self) -> Result<WritableFrame<'_>, FrameError> {
        self.reclaim()?;
        let state = self.state;
        let stream = self.stream.as_mut().ok_or(FrameError::NotStreaming(state))?;
        stream.pool.writable_frame().ok_or(FrameError::NoWritableBuffer)
    }

    fn reclaim(&mut self) -> Result<(), FrameError> {
        let state = self.state;
        let stream = self.stream.as_mut().ok_or(FrameError::NotStreaming(state))?;
        if stream.pool.writable_index().is_some() {
            return Ok(());
        }
        let result = stream
            .controller
            .reclaim(&mut self.device, &mut stream.pool, &self.clock);
        result.map(|_| ()).map_err(|err| self.dropped(err))
    }

    /// Copies a region of `src` into the free buffer at `(x, y)`.
    pub fn blit(
        &mut self,
        src: &SourcePlanes<'_>,
        width: usize,
        height: usize,
        x: usize,
        y: usize,
    ) -> Result<(), FrameError> {
        self.writable_frame()?.blit(src, width, height, x, y)
    }

    /// Whole-image entry point: copies unless the producer rendered directly.
    pub fn draw_image(&mut self, image: Image<'_>) -> Result<(), FrameError> {
        match image {
            Image::Direct => Ok(()),
            Image::Planes { planes, width, height } => self.blit(&planes, width, height, 0, 0),
        }
    }

    /// Copies a whole image into the free buffer and presents it.
    ///
    /// The copied region is clipped to the size the device accepted, which
    /// may be smaller than the source.
    pub fn present_image(
        &mut self,
        planes: &SourcePlanes<'_>,
        width: usize,
        height: usize,
    ) -> Result<u32, FrameError> {
        let effective = self
            .effective_format()
            .ok_or(FrameError::NotStreaming(self.state))?;
        let width = width.min(effective.frame.width as usize);
        let height = height.min(effective.frame.height as usize);
        if let Err(err) = self.blit(planes, width, height, 0, 0) {
            if matches!(err, FrameError::OutOfBounds { .. }) {
                warn!(%err, "Frame dropped");
            }
            return Err(err);
        }
        self.present()
    }

    /// Shows the free buffer and takes back the next one to write.
    ///
    /// Per-frame failures are logged and returned; the session keeps
    /// streaming. Only a vanished device stops it.
    pub fn present(&mut self) -> Result<u32, FrameError> {
        let state = self.state;
        let stream = self.stream.as_mut().ok_or(FrameError::NotStreaming(state))?;
        let result = stream
            .controller
            .present(&mut self.device, &mut stream.pool, &self.clock);
        result.map_err(|err| self.dropped(err))
    }

    fn dropped(&mut self, err: FrameError) -> FrameError {
        warn!(%err, "Frame dropped");
        if device_gone(&err) {
            self.close();
        }
        err
    }

    /// Stops streaming and unmaps every buffer. Failures are logged only.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.teardown(stream);
        }
        if self.state != StreamState::Stopped {
            info!(from = ?self.state, "Session stopped");
            self.state = StreamState::Stopped;
        }
    }

    fn teardown(&mut self, mut stream: ActiveStream<D::Mapping>) {
        stream.controller.stop(&mut self.device);
        stream.pool.release(&mut self.device);
    }
}

impl<D: OutputDevice, C: Clock> Drop for Session<D, C> {
    fn drop(&mut self) {
        self.close();
    }
}

fn device_gone(err: &FrameError) -> bool {
    let source = match err {
        FrameError::Dequeue(source) | FrameError::Submit { source, .. } => source,
        _ => return false,
    };
    source.raw_os_error() == Some(libc::ENODEV)
}
