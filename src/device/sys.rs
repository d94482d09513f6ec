//! fbdev request used to read the display resolution. V4L2 structs and
//! request codes come from `v4l`.

#![allow(non_camel_case_types)]

use std::os::raw::c_ulong;

pub const FBIOGET_VSCREENINFO: c_ulong = 0x4600;

/// Leading fields of `struct fb_var_screeninfo`; the rest is opaque.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct fb_var_screeninfo {
    pub xres: u32,
    pub yres: u32,
    pub rest: [u32; 38],
}

impl Default for fb_var_screeninfo {
    fn default() -> Self {
        Self { xres: 0, yres: 0, rest: [0; 38] }
    }
}
