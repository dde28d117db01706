//! Conversion between displayable bitmaps and the engine's `R,G,B` wire layout.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::{
    error::Result,
    types::{DisplayBitmap, RgbBuffer},
};

/// Drops alpha and emits `R,G,B` per pixel.
pub fn pack(bitmap: &DisplayBitmap) -> RgbBuffer {
    let rgb: Vec<u8> = bitmap
        .as_raw()
        .par_chunks_exact(4)
        .flat_map_iter(|px| [px[0], px[1], px[2]])
        .collect();

    RgbBuffer::from_packed(rgb, bitmap.width(), bitmap.height())
}

/// Rebuilds an opaque bitmap from raw wire bytes, rejecting any length other
/// than `width * height * 3`.
pub fn unpack(bytes: Vec<u8>, width: u32, height: u32) -> Result<DisplayBitmap> {
    let buffer = RgbBuffer::from_raw(bytes, width, height)?;
    Ok(unpack_buffer(&buffer))
}

pub fn unpack_buffer(buffer: &RgbBuffer) -> DisplayBitmap {
    let stride = buffer.width() as usize * 3;
    let src = buffer.as_bytes();
    let image = RgbaImage::from_fn(buffer.width(), buffer.height(), |x, y| {
        let i = y as usize * stride + x as usize * 3;
        Rgba([src[i], src[i + 1], src[i + 2], 255])
    });
    DisplayBitmap::from_image(image)
}
