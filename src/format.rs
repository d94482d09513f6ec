use std::fmt;

use bitflags::bitflags;

/// Four-character code as used by both the host player and the kernel.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub u32);

impl FourCc {
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(u32::from_le_bytes(*code))
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_le_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            bytes.iter().try_for_each(|b| write!(f, "{}", *b as char))
        } else {
            write!(f, "0x{:08x}", self.0)
        }
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({self})")
    }
}

/// Device-side planar formats.
pub const DEVICE_YUV420: FourCc = FourCc::new(b"YU12");
pub const DEVICE_YUV422P: FourCc = FourCc::new(b"422P");

/// Planar formats accepted from the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanarFormat {
    I420,
    Iyuv,
    Yv12,
    Yuv422P,
}

impl PlanarFormat {
    pub const ALL: [PlanarFormat; 4] = [Self::I420, Self::Iyuv, Self::Yv12, Self::Yuv422P];

    /// Maps a host format tag onto the closed set; anything else is unsupported.
    pub fn from_tag(tag: FourCc) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.tag() == tag)
    }

    pub const fn tag(self) -> FourCc {
        match self {
            Self::I420 => FourCc::new(b"I420"),
            Self::Iyuv => FourCc::new(b"IYUV"),
            Self::Yv12 => FourCc::new(b"YV12"),
            Self::Yuv422P => FourCc::new(b"422P"),
        }
    }

    pub const fn device_code(self) -> FourCc {
        match self {
            Self::I420 | Self::Iyuv | Self::Yv12 => DEVICE_YUV420,
            Self::Yuv422P => DEVICE_YUV422P,
        }
    }

    /// `(x, y)` log2 subsampling of the chroma planes.
    pub const fn chroma_shift(self) -> (u32, u32) {
        match self {
            Self::I420 | Self::Iyuv | Self::Yv12 => (1, 1),
            Self::Yuv422P => (1, 0),
        }
    }
}

/// Geometry and format of the frames flowing through one streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub format: PlanarFormat,
}

impl FrameFormat {
    pub fn chroma_x_shift(&self) -> u32 {
        self.format.chroma_shift().0
    }

    pub fn chroma_y_shift(&self) -> u32 {
        self.format.chroma_shift().1
    }
}

/// What the device actually accepted after a set/get format round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveFormat {
    pub frame: FrameFormat,
    pub bytes_per_line: u32,
    pub size_image: u32,
}

impl EffectiveFormat {
    pub fn layout(&self) -> PlaneLayout {
        PlaneLayout::new(self.frame, self.bytes_per_line)
    }
}

/// Byte layout of the three planes inside one device buffer.
///
/// Luma sits at the buffer base, chroma-U right after it and chroma-V right
/// after chroma-U, with no padding between planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub width: usize,
    pub height: usize,
    pub chroma_x_shift: u32,
    pub chroma_y_shift: u32,
    pub luma_stride: usize,
    pub chroma_stride: usize,
}

impl PlaneLayout {
    pub fn new(frame: FrameFormat, bytes_per_line: u32) -> Self {
        let width = frame.width as usize;
        let luma_stride = (bytes_per_line as usize).max(width);
        Self {
            width,
            height: frame.height as usize,
            chroma_x_shift: frame.chroma_x_shift(),
            chroma_y_shift: frame.chroma_y_shift(),
            luma_stride,
            chroma_stride: luma_stride >> frame.chroma_x_shift(),
        }
    }

    pub fn chroma_width(&self) -> usize {
        self.width >> self.chroma_x_shift
    }

    pub fn chroma_height(&self) -> usize {
        self.height >> self.chroma_y_shift
    }

    pub fn luma_len(&self) -> usize {
        self.luma_stride * self.height
    }

    pub fn chroma_len(&self) -> usize {
        self.chroma_stride * self.chroma_height()
    }

    pub fn chroma_u_offset(&self) -> usize {
        self.luma_len()
    }

    pub fn chroma_v_offset(&self) -> usize {
        self.luma_len() + self.chroma_len()
    }

    /// Minimum buffer length holding all three planes.
    pub fn frame_len(&self) -> usize {
        self.luma_len() + 2 * self.chroma_len()
    }
}

/// Sub-rectangle of the output surface the video is composited onto.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CropWindow {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

bitflags! {
    /// Capability answer given to the producer for a format query.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VideoCaps: u32 {
        const CSP_SUPPORTED = 0x01;
        const CSP_SUPPORTED_BY_HW = 0x02;
        const HWSCALE_UP = 0x100;
        const HWSCALE_DOWN = 0x200;
        const ACCEPT_STRIDE = 0x4000;
    }
}

impl VideoCaps {
    pub fn for_tag(tag: FourCc) -> Self {
        match PlanarFormat::from_tag(tag) {
            Some(_) => {
                Self::CSP_SUPPORTED
                    | Self::CSP_SUPPORTED_BY_HW
                    | Self::HWSCALE_UP
                    | Self::HWSCALE_DOWN
                    | Self::ACCEPT_STRIDE
            }
            None => Self::empty(),
        }
    }
}
