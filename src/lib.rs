//! Streaming planar YUV frames to a V4L2 video output device.
//!
//! A [`Session`] negotiates the device, keeps a small pool of memory-mapped
//! buffers cycling between the process and the driver, and hands the
//! producer the one buffer it may write.

mod clock;
mod compositor;
pub mod device;
mod error;
pub mod format;
pub mod frame;
mod negotiate;
mod options;
mod pool;
mod session;
mod sink;
mod stream;

#[cfg(test)]
mod testing;

pub use clock::{Clock, SystemClock};
pub use compositor::{SourcePlanes, WritableFrame};
pub use error::{AllocationError, ConfigurationError, FrameError, SessionError};
pub use format::{CropWindow, EffectiveFormat, FourCc, FrameFormat, PlanarFormat, PlaneLayout, VideoCaps};
pub use negotiate::{Negotiated, OutputMode};
pub use options::{OptionsError, OutputOptions, RetryPolicy};
pub use pool::{Buffer, BufferPool, BufferState, MIN_BUFFERS};
pub use session::{Image, Session, StreamState, open};
pub use sink::{FrameSink, Shown};
pub use stream::StreamController;
