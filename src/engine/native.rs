//! Binding to an external `libneuralgram` that exposes the engine over a C ABI.

use std::ffi::c_char;

use anyhow::{bail, ensure};

use super::{EnhancementEngine, FavoriteSample};
use crate::types::RgbBuffer;

#[link(name = "neuralgram")]
unsafe extern "C" {
    fn neuralgram_init();
    fn neuralgram_self_test() -> i32;
    fn neuralgram_process(input: *const u8, output: *mut u8, len: usize, width: i32, height: i32)
    -> i32;
    fn neuralgram_add_favorite(
        image: *const u8,
        len: usize,
        width: i32,
        height: i32,
        exposure: f32,
        contrast: f32,
        saturation: f32,
        sharpness: f32,
        warmth: f32,
    ) -> i32;
    /// Writes at most `cap - 1` bytes plus a NUL; returns the full length.
    fn neuralgram_stats(buf: *mut c_char, cap: usize) -> usize;
    fn neuralgram_favorite_count() -> i32;
    fn neuralgram_set_learning_strength(strength: i32);
    fn neuralgram_clear();
}

macro_rules! call_native {
    ($name:literal, $func:expr) => {{
        let status = unsafe { $func };
        if status != 0 {
            bail!("{} returned status {}", $name, status);
        }
        Ok(())
    }};
}

/// The library keeps global state, so only one instance should exist per process.
#[derive(Debug, Default)]
pub struct NativeEngine {
    _private: (),
}

impl NativeEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

fn dims(width: u32, height: u32) -> anyhow::Result<(i32, i32)> {
    Ok((i32::try_from(width)?, i32::try_from(height)?))
}

impl EnhancementEngine for NativeEngine {
    fn self_test(&mut self) -> anyhow::Result<()> {
        call_native!("neuralgram_self_test", neuralgram_self_test())
    }

    fn init(&mut self) -> anyhow::Result<()> {
        unsafe { neuralgram_init() };
        Ok(())
    }

    fn process(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        width: u32,
        height: u32,
    ) -> anyhow::Result<()> {
        let expected = RgbBuffer::expected_len(width, height);
        ensure!(
            input.len() == expected && output.len() == expected,
            "{width}x{height} needs {expected} bytes, got input {} and output {}",
            input.len(),
            output.len()
        );
        let (w, h) = dims(width, height)?;
        call_native!(
            "neuralgram_process",
            neuralgram_process(input.as_ptr(), output.as_mut_ptr(), input.len(), w, h)
        )
    }

    fn add_favorite(&mut self, sample: &FavoriteSample) -> anyhow::Result<()> {
        let image = &sample.image;
        let (w, h) = dims(image.width(), image.height())?;
        let style = sample.style;
        call_native!(
            "neuralgram_add_favorite",
            neuralgram_add_favorite(
                image.as_bytes().as_ptr(),
                image.len(),
                w,
                h,
                style.exposure,
                style.contrast,
                style.saturation,
                style.sharpness,
                style.warmth,
            )
        )
    }

    fn stats(&mut self) -> anyhow::Result<String> {
        let needed = unsafe { neuralgram_stats(std::ptr::null_mut(), 0) };
        let mut buf = vec![0u8; needed + 1];
        let written = unsafe { neuralgram_stats(buf.as_mut_ptr().cast::<c_char>(), buf.len()) };
        buf.truncate(written.min(needed));
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn favorite_count(&mut self) -> anyhow::Result<u32> {
        let count = unsafe { neuralgram_favorite_count() };
        if count < 0 {
            bail!("neuralgram_favorite_count returned {count}");
        }
        Ok(count as u32)
    }

    fn set_learning_strength(&mut self, strength: i32) -> anyhow::Result<()> {
        unsafe { neuralgram_set_learning_strength(strength) };
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        unsafe { neuralgram_clear() };
        Ok(())
    }
}
