//! Writing pixels into the buffer the process currently owns.

use crate::error::FrameError;
use crate::format::PlaneLayout;

/// Three source planes with their own strides, as handed over by a decoder.
#[derive(Debug, Clone, Copy)]
pub struct SourcePlanes<'a> {
    pub planes: [&'a [u8]; 3],
    pub strides: [usize; 3],
}

/// Plane views into the single free buffer.
///
/// Borrowing the pool mutably, it can't outlive a presentation cycle: the
/// buffer must be released before it is handed to the device.
pub struct WritableFrame<'a> {
    index: u32,
    luma: &'a mut [u8],
    chroma_u: &'a mut [u8],
    chroma_v: &'a mut [u8],
    layout: PlaneLayout,
}

impl<'a> WritableFrame<'a> {
    /// Splits `memory` into luma, chroma-U and chroma-V at the offsets given
    /// by `layout`. `None` if the buffer can't hold a whole frame.
    pub fn new(index: u32, memory: &'a mut [u8], layout: PlaneLayout) -> Option<Self> {
        if memory.len() < layout.frame_len() {
            return None;
        }
        let (luma, rest) = memory.split_at_mut(layout.luma_len());
        let (chroma_u, rest) = rest.split_at_mut(layout.chroma_len());
        let chroma_v = &mut rest[..layout.chroma_len()];
        Some(Self {
            index,
            luma,
            chroma_u,
            chroma_v,
            layout,
        })
    }

    /// Device buffer index backing this frame.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn layout(&self) -> &PlaneLayout {
        &self.layout
    }

    pub fn luma_stride(&self) -> usize {
        self.layout.luma_stride
    }

    pub fn chroma_stride(&self) -> usize {
        self.layout.chroma_stride
    }

    /// `[luma, chroma_u, chroma_v]` for a producer writing in place.
    pub fn planes_mut(&mut self) -> [&mut [u8]; 3] {
        [&mut *self.luma, &mut *self.chroma_u, &mut *self.chroma_v]
    }

    pub fn strides(&self) -> [usize; 3] {
        [self.layout.luma_stride, self.layout.chroma_stride, self.layout.chroma_stride]
    }

    pub fn planes(&self) -> [&[u8]; 3] {
        [&*self.luma, &*self.chroma_u, &*self.chroma_v]
    }

    /// Copies a `width`x`height` region from `src` into the frame at `(x, y)`.
    ///
    /// Luma gets `height` rows of `width` bytes; each chroma plane gets the
    /// subsampled row count and width. Source and destination strides are
    /// independent. Regions that don't fit either side fail before any byte
    /// is written.
    pub fn blit(
        &mut self,
        src: &SourcePlanes<'_>,
        width: usize,
        height: usize,
        x: usize,
        y: usize,
    ) -> Result<(), FrameError> {
        let (xs, ys) = (self.layout.chroma_x_shift, self.layout.chroma_y_shift);
        let luma = Region { x, y, width, height };
        let chroma = Region {
            x: x >> xs,
            y: y >> ys,
            width: width >> xs,
            height: height >> ys,
        };

        luma.check(self.layout.width, self.layout.height, self.layout.luma_stride, "luma")?;
        luma.check_source(src.planes[0], src.strides[0], "luma")?;
        let (cw, ch) = (self.layout.chroma_width(), self.layout.chroma_height());
        chroma.check(cw, ch, self.layout.chroma_stride, "chroma")?;
        chroma.check_source(src.planes[1], src.strides[1], "chroma U")?;
        chroma.check_source(src.planes[2], src.strides[2], "chroma V")?;

        luma.copy(self.luma, self.layout.luma_stride, src.planes[0], src.strides[0]);
        chroma.copy(self.chroma_u, self.layout.chroma_stride, src.planes[1], src.strides[1]);
        chroma.copy(self.chroma_v, self.layout.chroma_stride, src.planes[2], src.strides[2]);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Region {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
}

impl Region {
    fn check(
        &self,
        plane_width: usize,
        plane_height: usize,
        stride: usize,
        plane: &'static str,
    ) -> Result<(), FrameError> {
        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);
        let fits = right.is_some_and(|r| r <= plane_width.min(stride))
            && bottom.is_some_and(|b| b <= plane_height);
        if fits { Ok(()) } else { Err(FrameError::OutOfBounds { plane }) }
    }

    fn check_source(&self, src: &[u8], stride: usize, plane: &'static str) -> Result<(), FrameError> {
        if self.height == 0 || self.width == 0 {
            return Ok(());
        }
        let needed = (self.height - 1)
            .checked_mul(stride)
            .and_then(|n| n.checked_add(self.width));
        if self.width <= stride && needed.is_some_and(|n| n <= src.len()) {
            Ok(())
        } else {
            Err(FrameError::OutOfBounds { plane })
        }
    }

    fn copy(&self, dst: &mut [u8], dst_stride: usize, src: &[u8], src_stride: usize) {
        if self.width == 0 {
            return;
        }
        for row in 0..self.height {
            let d = (self.y + row) * dst_stride + self.x;
            let s = row * src_stride;
            dst[d..d + self.width].copy_from_slice(&src[s..s + self.width]);
        }
    }
}
