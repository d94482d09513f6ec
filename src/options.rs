use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_VIDEO_DEVICE: &str = "/dev/video0";
pub const DEFAULT_DISPLAY_DEVICE: &str = "/dev/fb0";
pub const DEFAULT_BUFFER_COUNT: u32 = 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OptionsError {
    #[error("unknown option '{0}'")]
    UnknownKey(String),
    #[error("option '{key}' expects a non-negative integer, got '{value}'")]
    InvalidNumber { key: String, value: String },
    #[error("option '{0}' expects a value")]
    MissingValue(String),
}

/// Bounded polling applied when waiting for the device to hand a buffer back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 16,
            delay: Duration::from_millis(30),
        }
    }
}

impl RetryPolicy {
    /// Longest time a single presentation may block.
    pub fn worst_case(&self) -> Duration {
        self.delay * self.attempts.saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputOptions {
    pub video_device: PathBuf,
    pub display_device: PathBuf,
    pub crop_left: u32,
    pub crop_top: u32,
    /// `None` falls back to the display resolution.
    pub crop_width: Option<u32>,
    pub crop_height: Option<u32>,
    pub buffer_count: u32,
    pub output_index: u32,
    pub require_overlay: bool,
    pub background_color: i32,
    pub retry: RetryPolicy,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            video_device: PathBuf::from(DEFAULT_VIDEO_DEVICE),
            display_device: PathBuf::from(DEFAULT_DISPLAY_DEVICE),
            crop_left: 0,
            crop_top: 0,
            crop_width: None,
            crop_height: None,
            buffer_count: DEFAULT_BUFFER_COUNT,
            output_index: 1,
            require_overlay: false,
            background_color: 0x00FF_FFEE,
            retry: RetryPolicy::default(),
        }
    }
}

impl OutputOptions {
    /// Parses the player's colon separated suboption string, e.g.
    /// `vdev=/dev/video1:fbdev=/dev/fb3:l=8:t=16:w=128:h=64`.
    ///
    /// A zero crop width or height means "use the display resolution".
    pub fn parse_suboptions(arg: &str) -> Result<Self, OptionsError> {
        let mut options = Self::default();
        options.apply_suboptions(arg)?;
        Ok(options)
    }

    /// Like [`parse_suboptions`](Self::parse_suboptions) but on top of the
    /// current values.
    pub fn apply_suboptions(&mut self, arg: &str) -> Result<(), OptionsError> {
        for token in arg.split(':').filter(|t| !t.is_empty()) {
            let (key, value) = match token.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (token, None),
            };
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Applies a single `key=value` pair. Keys are the suboption names.
    pub fn set(&mut self, key: &str, value: Option<&str>) -> Result<(), OptionsError> {
        match key {
            "overlay" => {
                self.require_overlay = match value {
                    None => true,
                    Some(v) => parse_number(key, v)? != 0,
                }
            }
            "vdev" => self.video_device = PathBuf::from(required(key, value)?),
            "fbdev" => self.display_device = PathBuf::from(required(key, value)?),
            "l" => self.crop_left = parse_number(key, required(key, value)?)?,
            "t" => self.crop_top = parse_number(key, required(key, value)?)?,
            "w" => self.crop_width = nonzero(parse_number(key, required(key, value)?)?),
            "h" => self.crop_height = nonzero(parse_number(key, required(key, value)?)?),
            "buffers" => self.buffer_count = parse_number(key, required(key, value)?)?,
            "output" => self.output_index = parse_number(key, required(key, value)?)?,
            _ => return Err(OptionsError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}

fn required<'a>(key: &str, value: Option<&'a str>) -> Result<&'a str, OptionsError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OptionsError::MissingValue(key.to_string()))
}

fn nonzero(value: u32) -> Option<u32> {
    Some(value).filter(|v| *v != 0)
}

fn parse_number(key: &str, value: &str) -> Result<u32, OptionsError> {
    value.parse().map_err(|_| OptionsError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}
