//! Shared-memory frame published on the `camera/frames` service.

use iceoryx2::prelude::ZeroCopySend;

use crate::compositor::SourcePlanes;
use crate::format::{FourCc, PlanarFormat};

/// Max frame size: 1080p YUV420 = 1920 * 1080 * 1.5 ≈ 3.1MB
pub const MAX_FRAME_SIZE: usize = 1920 * 1080 * 3 / 2;

/// Pixel format identifier (matches common fourcc codes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ZeroCopySend)]
pub enum PixelFormat {
    Yuv420 = 0x32315559,  // YU12 / I420
    Yuv422p = 0x50323234, // 422P
    Nv12 = 0x3231564E,    // NV12
    Nv21 = 0x3132564E,    // NV21
    Unknown = 0,
}

impl PixelFormat {
    /// Planar format the output device can take, if any. Semi-planar
    /// layouts have no counterpart.
    pub fn planar(self) -> Option<PlanarFormat> {
        match self {
            Self::Yuv420 => Some(PlanarFormat::I420),
            Self::Yuv422p => Some(PlanarFormat::Yuv422P),
            Self::Nv12 | Self::Nv21 | Self::Unknown => None,
        }
    }

    pub fn planar_tag(self) -> Option<FourCc> {
        self.planar().map(PlanarFormat::tag)
    }
}

#[repr(C)]
#[derive(Debug, ZeroCopySend)]
#[type_name("Frame")]
pub struct Frame {
    pub timestamp_ns: u64,
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub len: u32,
    pub data: [u8; MAX_FRAME_SIZE],
}

impl Frame {
    pub fn bytes(&self) -> &[u8] {
        &self.data[..(self.len as usize).min(MAX_FRAME_SIZE)]
    }

    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            sequence: self.sequence,
            width: self.width,
            height: self.height,
            stride: self.stride,
            format: self.format,
            data: self.bytes(),
        }
    }
}

unsafe impl Send for Frame {}
unsafe impl Sync for Frame {}

/// Borrowed header and payload of one received frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub data: &'a [u8],
}

impl<'a> FrameView<'a> {
    /// `None` for non-planar formats or a payload too short for its header.
    pub fn planes(&self) -> Option<SourcePlanes<'a>> {
        let format = self.format.planar()?;
        source_planes(self.data, self.height as usize, self.stride as usize, format)
    }
}

/// Splits a contiguous planar payload (luma, then U, then V) into planes.
/// Chroma rows are `stride` shifted by the horizontal subsampling.
pub fn source_planes(
    data: &[u8],
    height: usize,
    stride: usize,
    format: PlanarFormat,
) -> Option<SourcePlanes<'_>> {
    let (xs, ys) = format.chroma_shift();
    let chroma_stride = stride >> xs;
    let luma_len = stride.checked_mul(height)?;
    let chroma_len = chroma_stride.checked_mul(height >> ys)?;
    let total = chroma_len.checked_mul(2)?.checked_add(luma_len)?;
    if data.len() < total {
        return None;
    }

    let (luma, rest) = data.split_at(luma_len);
    let (u, rest) = rest.split_at(chroma_len);
    let v = &rest[..chroma_len];
    let (u, v) = match format {
        PlanarFormat::Yv12 => (v, u),
        _ => (u, v),
    };
    Some(SourcePlanes {
        planes: [luma, u, v],
        strides: [stride, chroma_stride, chroma_stride],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semi_planar_formats_have_no_tag() {
        assert_eq!(PixelFormat::Yuv420.planar_tag(), Some(FourCc::new(b"I420")));
        assert_eq!(PixelFormat::Yuv422p.planar_tag(), Some(FourCc::new(b"422P")));
        assert_eq!(PixelFormat::Nv12.planar_tag(), None);
        assert_eq!(PixelFormat::Nv21.planar_tag(), None);
        assert_eq!(PixelFormat::Unknown.planar_tag(), None);
    }

    #[test]
    fn fourcc_values_match_device_codes() {
        assert_eq!(PixelFormat::Yuv420 as u32, FourCc::new(b"YU12").0);
        assert_eq!(PixelFormat::Yuv422p as u32, FourCc::new(b"422P").0);
        assert_eq!(PixelFormat::Nv12 as u32, FourCc::new(b"NV12").0);
    }

    #[test]
    fn splits_yuv420_payload() {
        let mut data = vec![0u8; 8 * 4];
        data.extend([1u8; 4 * 2]);
        data.extend([2u8; 4 * 2]);
        let planes = source_planes(&data, 4, 8, PlanarFormat::I420).unwrap();
        assert_eq!(planes.strides, [8, 4, 4]);
        assert_eq!(planes.planes[0].len(), 32);
        assert!(planes.planes[1].iter().all(|b| *b == 1));
        assert!(planes.planes[2].iter().all(|b| *b == 2));
    }

    #[test]
    fn yuv422p_keeps_full_chroma_height() {
        let data = vec![0u8; 8 * 4 * 2];
        let planes = source_planes(&data, 4, 8, PlanarFormat::Yuv422P).unwrap();
        assert_eq!(planes.planes[1].len(), 16);
        assert!(source_planes(&data[..63], 4, 8, PlanarFormat::Yuv422P).is_none());
    }

    #[test]
    fn oversized_header_is_rejected() {
        let data = vec![0u8; 64];
        assert!(source_planes(&data, usize::MAX, usize::MAX, PlanarFormat::I420).is_none());
        assert!(source_planes(&data, 2, usize::MAX / 2, PlanarFormat::I420).is_none());
        assert!(source_planes(&data, usize::MAX / 4, 4, PlanarFormat::Yuv422P).is_none());

        let view = FrameView {
            sequence: 0,
            width: u32::MAX,
            height: u32::MAX,
            stride: u32::MAX,
            format: PixelFormat::Yuv420,
            data: &data,
        };
        assert!(view.planes().is_none());
    }

    #[test]
    fn semi_planar_view_has_no_planes() {
        let data = vec![0u8; 8 * 4 * 2];
        let view = FrameView {
            sequence: 1,
            width: 8,
            height: 4,
            stride: 8,
            format: PixelFormat::Nv12,
            data: &data,
        };
        assert!(view.planes().is_none());
        let view = FrameView { format: PixelFormat::Yuv420, ..view };
        assert_eq!(view.planes().map(|p| p.strides), Some([8, 4, 4]));
    }

    #[test]
    fn yv12_swaps_chroma_order() {
        let mut data = vec![0u8; 4 * 2];
        data.extend([7u8; 2]);
        data.extend([9u8; 2]);
        let planes = source_planes(&data, 2, 4, PlanarFormat::Yv12).unwrap();
        assert_eq!(planes.planes[1], &[9, 9]);
        assert_eq!(planes.planes[2], &[7, 7]);
    }
}
