//! Capability negotiation: output mode, crop window and pixel format.

use tracing::{debug, info, warn};
use v4l::v4l_sys::V4L2_CID_PRIVATE_BASE;

use crate::device::{
    BufferKind, DeviceCapabilities, DeviceInfo, DisplayGeometry, OutputDevice, OverlayWindow,
    PixFormat,
};
use crate::error::{ConfigurationError, SessionError};
use crate::format::{CropWindow, EffectiveFormat, FrameFormat};
use crate::options::OutputOptions;

/// Controls carrying the overlay background and colour-key colours.
pub const BACKGROUND_CONTROLS: [u32; 2] = [V4L2_CID_PRIVATE_BASE + 1, V4L2_CID_PRIVATE_BASE + 2];

/// How frames reach the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Plain video output.
    Plain,
    /// Video output blended over the framebuffer through an overlay window.
    Overlay,
}

impl OutputMode {
    /// Picks the richest mode the device reports.
    pub fn from_capabilities(caps: DeviceCapabilities) -> Option<Self> {
        if caps.contains(DeviceCapabilities::VIDEO_OUTPUT_OVERLAY) {
            Some(Self::Overlay)
        } else if caps.contains(DeviceCapabilities::VIDEO_OUTPUT) {
            Some(Self::Plain)
        } else {
            None
        }
    }

    pub fn crop_target(self) -> BufferKind {
        match self {
            Self::Plain => BufferKind::Output,
            Self::Overlay => BufferKind::OutputOverlay,
        }
    }
}

/// Outcome of device negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub info: DeviceInfo,
    pub mode: OutputMode,
    pub crop: CropWindow,
}

/// Queries the device, settles on an output mode and applies the crop window.
///
/// Overlay setup failures degrade to [`OutputMode::Plain`] unless
/// `options.require_overlay` is set. A failed crop always fails negotiation.
pub fn negotiate_device<D, G>(
    device: &mut D,
    display: &mut G,
    options: &OutputOptions,
) -> Result<Negotiated, SessionError>
where
    D: OutputDevice,
    G: DisplayGeometry + ?Sized,
{
    let info = device.query_capabilities().map_err(SessionError::CapabilityQuery)?;
    let mut mode =
        OutputMode::from_capabilities(info.capabilities).ok_or(SessionError::UnsupportedDevice)?;
    info!(driver = %info.driver, card = %info.card, ?mode, "Output device detected");

    if mode == OutputMode::Overlay {
        if let Err(err) = enable_overlay(device, options.output_index) {
            mode = degrade(err, options)?;
        }
    }

    let crop = crop_window(display, options)?;
    device
        .set_crop(mode.crop_target(), crop)
        .map_err(SessionError::Crop)?;
    debug!(?crop, "Crop set");

    if mode == OutputMode::Overlay {
        if let Err(err) = set_background(device, options.background_color) {
            mode = degrade(err, options)?;
        }
    }

    Ok(Negotiated { info, mode, crop })
}

fn degrade(err: ConfigurationError, options: &OutputOptions) -> Result<OutputMode, SessionError> {
    if options.require_overlay {
        return Err(err.into());
    }
    warn!(%err, "Overlay unavailable, falling back to plain output");
    Ok(OutputMode::Plain)
}

fn enable_overlay<D: OutputDevice>(device: &mut D, index: u32) -> Result<(), ConfigurationError> {
    device
        .set_output(index)
        .map_err(|source| ConfigurationError::SelectOutput { index, source })?;
    let output = device
        .enumerate_output(index)
        .map_err(|source| ConfigurationError::EnumerateOutput { index, source })?;
    debug!(index, name = %output.name, "Output selected");
    device
        .enable_overlay_framebuffer()
        .map_err(ConfigurationError::Framebuffer)
}

fn set_background<D: OutputDevice>(device: &mut D, color: i32) -> Result<(), ConfigurationError> {
    for id in BACKGROUND_CONTROLS {
        device
            .set_control(id, color)
            .map_err(|source| ConfigurationError::Control { id, source })?;
    }
    Ok(())
}

/// Explicit crop size, or the display resolution for any dimension left unset.
pub fn crop_window<G>(display: &mut G, options: &OutputOptions) -> Result<CropWindow, SessionError>
where
    G: DisplayGeometry + ?Sized,
{
    let (width, height) = match (options.crop_width, options.crop_height) {
        (Some(w), Some(h)) => (w, h),
        (w, h) => {
            let (xres, yres) = display.resolution().map_err(SessionError::Display)?;
            (w.unwrap_or(xres), h.unwrap_or(yres))
        }
    };
    Ok(CropWindow {
        left: options.crop_left,
        top: options.crop_top,
        width,
        height,
    })
}

/// Sets the stream format and reads back what the device accepted.
///
/// Returns the effective format (dimensions may differ from the request) and
/// the mode to stream in: an overlay whose window can't be configured drops
/// to plain output for this stream.
pub fn negotiate_format<D: OutputDevice>(
    device: &mut D,
    mode: OutputMode,
    requested: FrameFormat,
) -> Result<(EffectiveFormat, OutputMode), SessionError> {
    let code = requested.format.device_code();
    device
        .set_format(&PixFormat {
            width: requested.width,
            height: requested.height,
            pixel_format: code,
            bytes_per_line: 0,
            size_image: 0,
        })
        .map_err(SessionError::Format)?;
    let accepted = device.get_format().map_err(SessionError::Format)?;

    if accepted.pixel_format != code {
        warn!(requested = %code, accepted = %accepted.pixel_format, "Device substituted pixel format");
        return Err(SessionError::UnsupportedFormat(accepted.pixel_format));
    }
    if accepted.width == 0 || accepted.height == 0 {
        return Err(SessionError::InvalidDimensions {
            width: accepted.width,
            height: accepted.height,
        });
    }

    let effective = EffectiveFormat {
        frame: FrameFormat {
            width: accepted.width,
            height: accepted.height,
            format: requested.format,
        },
        bytes_per_line: accepted.bytes_per_line,
        size_image: accepted.size_image,
    };
    if effective.frame != requested {
        info!(
            width = accepted.width,
            height = accepted.height,
            "Device adjusted frame size"
        );
    }

    let mut mode = mode;
    if mode == OutputMode::Overlay {
        let window = OverlayWindow {
            window: CropWindow {
                left: 0,
                top: 0,
                width: effective.frame.width,
                height: effective.frame.height,
            },
            chromakey: 1,
            global_alpha: 1,
        };
        // Tolerated: the frame still reaches the plain output queue.
        if let Err(source) = device.set_overlay_window(&window) {
            warn!(err = %ConfigurationError::OverlayWindow(source), "Continuing without overlay window");
            mode = OutputMode::Plain;
        }
    }

    Ok((effective, mode))
}
