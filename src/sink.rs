//! Feeds received frames into a session, reconfiguring when their geometry
//! changes.

use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::device::OutputDevice;
use crate::error::SessionError;
use crate::format::FourCc;
use crate::frame::{FrameView, PixelFormat};
use crate::session::{Session, StreamState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Geometry {
    width: u32,
    height: u32,
    tag: FourCc,
}

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shown {
    Presented(u32),
    /// Not planar, or its geometry was refused by the device.
    Skipped,
    /// Reached the session but failed; the reason is already logged.
    Dropped,
}

pub struct FrameSink<D: OutputDevice, C: Clock = SystemClock> {
    session: Session<D, C>,
    title: String,
    configured: Option<Geometry>,
    rejected: Option<Geometry>,
    skipped_format: Option<PixelFormat>,
}

impl<D: OutputDevice, C: Clock> FrameSink<D, C> {
    pub fn new(session: Session<D, C>, title: impl Into<String>) -> Self {
        Self {
            session,
            title: title.into(),
            configured: None,
            rejected: None,
            skipped_format: None,
        }
    }

    pub fn session(&self) -> &Session<D, C> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<D, C> {
        &mut self.session
    }

    /// Shows one frame.
    ///
    /// Configuration and per-frame failures are logged and the frame skipped.
    /// A geometry the device refused is not retried until a frame with a
    /// different one arrives. Errors are returned only once the session has
    /// stopped for good.
    pub fn show(&mut self, frame: &FrameView<'_>) -> Result<Shown, SessionError> {
        let Some(tag) = frame.format.planar_tag() else {
            if self.skipped_format != Some(frame.format) {
                warn!(format = ?frame.format, "Pixel format has no planar output, skipping frames");
                self.skipped_format = Some(frame.format);
            }
            return Ok(Shown::Skipped);
        };
        self.skipped_format = None;

        let wanted = Geometry {
            width: frame.width,
            height: frame.height,
            tag,
        };
        if self.configured != Some(wanted) {
            if self.rejected == Some(wanted) {
                return Ok(Shown::Skipped);
            }
            if let Err(err) = self.configure(wanted) {
                return self.stopped().map_or(Ok(Shown::Skipped), |_| Err(err));
            }
        }

        let Some(planes) = frame.planes() else {
            warn!(
                seq = frame.sequence,
                len = frame.data.len(),
                stride = frame.stride,
                "Frame payload too short, skipping"
            );
            return Ok(Shown::Dropped);
        };
        let width = frame.width as usize;
        let height = frame.height as usize;
        match self.session.present_image(&planes, width, height) {
            Ok(index) => {
                debug!(seq = frame.sequence, index, "Presented");
                Ok(Shown::Presented(index))
            }
            Err(_) => match self.stopped() {
                Some(state) => Err(SessionError::InvalidState(state)),
                None => Ok(Shown::Dropped),
            },
        }
    }

    fn configure(&mut self, wanted: Geometry) -> Result<(), SessionError> {
        self.configured = None;
        let result = self.session.configure(
            wanted.width,
            wanted.height,
            wanted.width,
            wanted.height,
            0,
            &self.title,
            wanted.tag,
        );
        match &result {
            Ok(()) => {
                self.configured = Some(wanted);
                self.rejected = None;
            }
            Err(err) => {
                warn!(
                    %err,
                    width = wanted.width,
                    height = wanted.height,
                    format = %wanted.tag,
                    "Configuration refused, skipping frames until the geometry changes"
                );
                self.rejected = Some(wanted);
            }
        }
        result
    }

    fn stopped(&self) -> Option<StreamState> {
        let state = self.session.state();
        (state == StreamState::Stopped).then_some(state)
    }
}
