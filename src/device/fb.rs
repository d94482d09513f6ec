use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::DisplayGeometry;
use super::sys;
use super::v4l2::xioctl;
use crate::error::SessionError;

/// Framebuffer device used only to learn the display resolution.
pub struct Framebuffer {
    file: File,
    path: PathBuf,
}

impl Framebuffer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| SessionError::DeviceOpen { path: path.clone(), source })?;
        Ok(Self { file, path })
    }
}

impl DisplayGeometry for Framebuffer {
    fn resolution(&mut self) -> io::Result<(u32, u32)> {
        let mut info = sys::fb_var_screeninfo::default();
        xioctl(self.file.as_raw_fd(), sys::FBIOGET_VSCREENINFO, &mut info)?;
        debug!(path = %self.path.display(), xres = info.xres, yres = info.yres, "Display geometry");
        Ok((info.xres, info.yres))
    }
}
