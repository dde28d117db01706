pub mod bridge;
#[cfg(feature = "native-engine")]
pub mod native;
pub mod personal;

use std::any::Any;

use crate::types::RgbBuffer;

pub use bridge::EnhancementBridge;
#[cfg(feature = "native-engine")]
pub use native::NativeEngine;
pub use personal::PersonalEngine;

/// Engine state saved before a mutating call.
pub type Checkpoint = Box<dyn Any + Send>;

/// Image-processing engine behind the bridge.
///
/// Buffers are interleaved `R,G,B`, row-major, `width * height * 3` bytes.
/// Implementations are only ever driven from the bridge's worker thread.
pub trait EnhancementEngine: Send + 'static {
    fn self_test(&mut self) -> anyhow::Result<()>;

    fn init(&mut self) -> anyhow::Result<()>;

    /// Writes the enhanced image into `output`, which has the same length as `input`.
    fn process(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        width: u32,
        height: u32,
    ) -> anyhow::Result<()>;

    fn add_favorite(&mut self, sample: &FavoriteSample) -> anyhow::Result<()>;

    fn stats(&mut self) -> anyhow::Result<String>;

    fn favorite_count(&mut self) -> anyhow::Result<u32>;

    fn set_learning_strength(&mut self, strength: i32) -> anyhow::Result<()>;

    fn clear(&mut self) -> anyhow::Result<()>;

    /// Snapshot taken before `process`, `add_favorite`, `set_learning_strength`
    /// and `clear`. Engines that return `None` cannot be rolled back.
    fn checkpoint(&self) -> Option<Checkpoint> {
        None
    }

    /// Puts back a snapshot from [`checkpoint`](Self::checkpoint) after a call
    /// failed or its caller stopped waiting.
    fn restore(&mut self, _checkpoint: Checkpoint) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Adjustment scalars attached to a favorite.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StyleParams {
    pub exposure: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub sharpness: f32,
    pub warmth: f32,
}

impl StyleParams {
    pub fn to_array(self) -> [f32; 5] {
        [
            self.exposure,
            self.contrast,
            self.saturation,
            self.sharpness,
            self.warmth,
        ]
    }
}

impl Default for StyleParams {
    fn default() -> Self {
        Self {
            exposure: 1.1,
            contrast: 1.15,
            saturation: 1.2,
            sharpness: 0.08,
            warmth: 0.5,
        }
    }
}

/// A photo the user liked, plus the style it was shot with.
#[derive(Clone, Debug)]
pub struct FavoriteSample {
    pub image: RgbBuffer,
    pub style: StyleParams,
}

impl FavoriteSample {
    pub fn new(image: RgbBuffer, style: StyleParams) -> Self {
        Self { image, style }
    }
}
