use std::{path::Path, time::Instant};

use image::RgbaImage;

use crate::error::{PipelineError, Result};

/// Pixel format reported by the camera for a captured frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    /// Single plane holding a JPEG stream.
    Jpeg,
    /// Three planes: full resolution Y, then U and V subsampled 2x2 (4:2:0).
    Yuv420,
    /// Single plane of already packed RGBA pixels.
    Rgba8888,
    /// A platform format code this pipeline does not understand.
    Unknown(u32),
}

impl FrameFormat {
    pub fn label(&self) -> String {
        match self {
            FrameFormat::Jpeg => "JPEG".to_string(),
            FrameFormat::Yuv420 => "YUV 4:2:0".to_string(),
            FrameFormat::Rgba8888 => "RGBA8888".to_string(),
            FrameFormat::Unknown(code) => format!("unknown (0x{code:x})"),
        }
    }
}

/// Raw sensor output for one capture request.
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    pub format: FrameFormat,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<Vec<u8>>,
    pub timestamp: Instant,
}

impl CapturedFrame {
    pub fn jpeg(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self::new(FrameFormat::Jpeg, width, height, vec![data])
    }

    pub fn yuv420(y: Vec<u8>, u: Vec<u8>, v: Vec<u8>, width: u32, height: u32) -> Self {
        Self::new(FrameFormat::Yuv420, width, height, vec![y, u, v])
    }

    pub fn rgba(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self::new(FrameFormat::Rgba8888, width, height, vec![data])
    }

    pub fn new(format: FrameFormat, width: u32, height: u32, planes: Vec<Vec<u8>>) -> Self {
        Self {
            format,
            width,
            height,
            planes,
            timestamp: Instant::now(),
        }
    }
}

/// Interleaved `R,G,B` bytes in row-major order, the engine's wire layout.
///
/// The length is always `width * height * 3`; every constructor checks it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgbBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl RgbBuffer {
    pub fn expected_len(width: u32, height: u32) -> usize {
        (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(3)
    }

    pub fn from_raw(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = Self::expected_len(width, height);
        if data.len() != expected {
            return Err(PipelineError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// For producers that build the bytes from known dimensions.
    pub(crate) fn from_packed(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), Self::expected_len(width, height));
        Self {
            data,
            width,
            height,
        }
    }

    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            data,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Displayable RGBA bitmap. Alpha is opaque for anything coming out of the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayBitmap {
    image: RgbaImage,
}

impl DisplayBitmap {
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(4);
        let actual = rgba.len();
        let image = (actual == expected)
            .then(|| RgbaImage::from_raw(width, height, rgba))
            .flatten();
        let Some(image) = image else {
            return Err(PipelineError::InvalidFrameShape(format!(
                "RGBA bitmap {width}x{height} needs {expected} bytes, got {actual}"
            )));
        };
        Ok(Self { image })
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.image.get_pixel(x, y).0
    }

    /// Pixel packed as `0xAARRGGBB`.
    pub fn argb(&self, x: u32, y: u32) -> u32 {
        let [r, g, b, a] = self.pixel(x, y);
        (a as u32) << 24 | (r as u32) << 16 | (g as u32) << 8 | b as u32
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.image
            .save(path)
            .map_err(|err| std::io::Error::other(format!("{}: {err}", path.display())))?;
        Ok(())
    }
}
