use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::format::FourCc;
use crate::session::StreamState;

/// Failures while bringing a session up. All of them abort session start.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("can't open {}: {source}", path.display())]
    DeviceOpen { path: PathBuf, source: io::Error },

    #[error("capability query failed: {0}")]
    CapabilityQuery(#[source] io::Error),

    #[error("device supports neither video output nor video output overlay")]
    UnsupportedDevice,

    #[error("pixel format {0} not supported")]
    UnsupportedFormat(FourCc),

    #[error("invalid frame size {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("display geometry query failed: {0}")]
    Display(#[source] io::Error),

    #[error("set crop failed: {0}")]
    Crop(#[source] io::Error),

    #[error("format negotiation failed: {0}")]
    Format(#[source] io::Error),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("could not stream on: {0}")]
    StreamStart(#[source] io::Error),

    #[error("operation not valid in state {0:?}")]
    InvalidState(StreamState),
}

/// Buffer pool setup failures.
#[derive(Error, Debug)]
pub enum AllocationError {
    #[error("buffer request for {count} buffers failed: {source}")]
    Request { count: u32, source: io::Error },

    #[error("insufficient buffer memory: requested {requested}, granted {granted}")]
    InsufficientBuffers { requested: u32, granted: u32 },

    #[error("query of buffer {index} failed: {source}")]
    Query { index: u32, source: io::Error },

    #[error("mapping buffer {index} failed: {source}")]
    Map { index: u32, source: io::Error },

    #[error("buffer {index} holds {length} bytes, frame needs {required}")]
    BufferTooSmall { index: u32, length: usize, required: usize },

    #[error("priming buffer {index} failed: {source}")]
    Prime { index: u32, source: io::Error },
}

/// Overlay-only setup failures. They degrade the session to plain output
/// unless overlay was explicitly required.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("failed to set output {index}: {source}")]
    SelectOutput { index: u32, source: io::Error },

    #[error("failed to enumerate output {index}: {source}")]
    EnumerateOutput { index: u32, source: io::Error },

    #[error("set overlay framebuffer failed: {0}")]
    Framebuffer(#[source] io::Error),

    #[error("set control {id:#x} failed: {source}")]
    Control { id: u32, source: io::Error },

    #[error("set output overlay format failed: {0}")]
    OverlayWindow(#[source] io::Error),
}

/// Per-frame failures. The session keeps streaming after any of these.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("session is not streaming (state {0:?})")]
    NotStreaming(StreamState),

    #[error("no writable buffer held by the process")]
    NoWritableBuffer,

    #[error("queueing buffer {index} failed: {source}")]
    Submit { index: u32, source: io::Error },

    #[error("no buffer returned after {attempts} dequeue attempts")]
    DequeueTimeout { attempts: u32 },

    #[error("dequeue failed: {0}")]
    Dequeue(#[source] io::Error),

    #[error("device returned buffer {index} which was not queued")]
    UnexpectedBuffer { index: u32 },

    #[error("{plane} plane region out of bounds")]
    OutOfBounds { plane: &'static str },
}
