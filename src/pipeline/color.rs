//! YUV 4:2:0 planar to interleaved RGB(A), BT.601 full range.

use rayon::prelude::*;

use crate::error::{PipelineError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb,
    /// RGB plus an opaque alpha byte.
    Rgba,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgb => 3,
            PixelLayout::Rgba => 4,
        }
    }
}

/// Borrowed view over the three planes of a 4:2:0 frame.
#[derive(Clone, Copy, Debug)]
pub struct Yuv420Planes<'a> {
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// Minimum chroma plane length addressed by `(y/2)*(width/2) + x/2`.
pub fn required_chroma_len(width: u32, height: u32) -> usize {
    if width == 0 || height == 0 {
        return 0;
    }
    let (w, h) = (width as usize, height as usize);
    ((h - 1) / 2) * (w / 2) + (w - 1) / 2 + 1
}

pub fn yuv420_to_rgb(planes: &Yuv420Planes<'_>, layout: PixelLayout) -> Result<Vec<u8>> {
    validate_planes(planes)?;

    let width = planes.width as usize;
    let height = planes.height as usize;
    let bpp = layout.bytes_per_pixel();
    let chroma_stride = width / 2;

    let mut out = vec![0u8; width * height * bpp];
    out.par_chunks_mut(width * bpp)
        .enumerate()
        .for_each(|(row, dst)| {
            let luma = &planes.y[row * width..(row + 1) * width];
            let chroma_row = (row / 2) * chroma_stride;
            for (x, px) in dst.chunks_exact_mut(bpp).enumerate() {
                let uv = chroma_row + x / 2;
                let [r, g, b] = yuv_to_rgb(luma[x], planes.u[uv], planes.v[uv]);
                px[0] = r;
                px[1] = g;
                px[2] = b;
                if bpp == 4 {
                    px[3] = 255;
                }
            }
        });

    Ok(out)
}

#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f64;
    let u = u as f64 - 128.0;
    let v = v as f64 - 128.0;

    [
        to_channel(y + 1.402 * v),
        to_channel(y - 0.344136 * u - 0.714136 * v),
        to_channel(y + 1.772 * u),
    ]
}

// `as i32` truncates toward zero, then clamp.
#[inline]
fn to_channel(value: f64) -> u8 {
    (value as i32).clamp(0, 255) as u8
}

fn validate_planes(planes: &Yuv420Planes<'_>) -> Result<()> {
    let (width, height) = (planes.width, planes.height);
    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidFrameShape(format!(
            "frame dimensions must be non-zero, got {width}x{height}"
        )));
    }

    let luma_len = width as usize * height as usize;
    if planes.y.len() < luma_len {
        return Err(PipelineError::InvalidFrameShape(format!(
            "Y plane too small: got {}, expected {luma_len}",
            planes.y.len()
        )));
    }

    let chroma_len = required_chroma_len(width, height);
    for (name, plane) in [("U", planes.u), ("V", planes.v)] {
        if plane.len() < chroma_len {
            return Err(PipelineError::InvalidFrameShape(format!(
                "{name} plane too small: got {}, expected {chroma_len}",
                plane.len()
            )));
        }
    }

    Ok(())
}
