//! Bundled engine that learns a photographic style from favorites.

use std::collections::VecDeque;

use anyhow::{anyhow, bail, ensure};
use rayon::prelude::*;

use super::{Checkpoint, EnhancementEngine, FavoriteSample, StyleParams};
use crate::types::RgbBuffer;

pub const MAX_FAVORITES: usize = 100;
pub const FEATURE_COUNT: usize = 10;
pub const PARAM_COUNT: usize = 5;
pub const SCENE_COUNT: usize = 7;

const DEFAULT_LEARNING_STRENGTH: i32 = 75;
const SAMPLE_STEP: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scene {
    Portrait,
    Landscape,
    LowLight,
    Sunset,
    Indoor,
    Macro,
    Unknown,
}

impl Scene {
    pub const ALL: [Scene; SCENE_COUNT] = [
        Scene::Portrait,
        Scene::Landscape,
        Scene::LowLight,
        Scene::Sunset,
        Scene::Indoor,
        Scene::Macro,
        Scene::Unknown,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Scene::Portrait => "Portrait",
            Scene::Landscape => "Landscape",
            Scene::LowLight => "Low Light",
            Scene::Sunset => "Sunset",
            Scene::Indoor => "Indoor",
            Scene::Macro => "Macro",
            Scene::Unknown => "Unknown",
        }
    }

    /// First matching rule wins.
    pub fn detect(signature: &PhotoSignature) -> Scene {
        let brightness = signature.brightness();
        let contrast = signature.contrast();

        if brightness < 0.3 && contrast < 0.2 {
            Scene::LowLight
        } else if brightness > 0.4 && brightness < 0.7 && signature.red_green_ratio() > 1.1 {
            Scene::Portrait
        } else if signature.warmth() > 0.7 && brightness > 0.3 {
            Scene::Sunset
        } else if brightness > 0.6 && contrast > 0.3 {
            Scene::Landscape
        } else if signature.saturation() > 0.7 {
            Scene::Macro
        } else if brightness > 0.3 && brightness < 0.6 {
            Scene::Indoor
        } else {
            Scene::Unknown
        }
    }
}

/// Coarse color statistics of a photo, sampled on an 8 pixel grid.
///
/// Layout: mean brightness, mean R, mean G, mean B, brightness range,
/// warm ratio, mean saturation, R/G, G/B, (R+G)/B.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhotoSignature(pub [f32; FEATURE_COUNT]);

impl PhotoSignature {
    pub fn extract(rgb: &[u8], width: u32, height: u32) -> Self {
        let (width, height) = (width as usize, height as usize);
        let total_bytes = width * height * 3;

        let mut brightness_sum = 0.0f32;
        let (mut r_sum, mut g_sum, mut b_sum) = (0.0f32, 0.0f32, 0.0f32);
        let (mut min_bright, mut max_bright) = (1.0f32, 0.0f32);
        let (mut warm_sum, mut cool_sum) = (0.0f32, 0.0f32);
        let mut saturation_sum = 0.0f32;
        let mut samples = 0usize;

        for y in (0..height).step_by(SAMPLE_STEP) {
            for x in (0..width).step_by(SAMPLE_STEP) {
                let idx = (y * width + x) * 3;
                if idx + 2 >= total_bytes || idx + 2 >= rgb.len() {
                    continue;
                }

                let r = rgb[idx] as f32 / 255.0;
                let g = rgb[idx + 1] as f32 / 255.0;
                let b = rgb[idx + 2] as f32 / 255.0;

                let brightness = 0.299 * r + 0.587 * g + 0.114 * b;
                brightness_sum += brightness;
                r_sum += r;
                g_sum += g;
                b_sum += b;
                min_bright = min_bright.min(brightness);
                max_bright = max_bright.max(brightness);

                warm_sum += r + g * 0.5;
                cool_sum += b;

                let max_ch = r.max(g).max(b);
                let min_ch = r.min(g).min(b);
                if max_ch > 0.0 {
                    saturation_sum += (max_ch - min_ch) / max_ch;
                }

                samples += 1;
            }
        }

        let n = samples.max(1) as f32;
        Self([
            brightness_sum / n,
            r_sum / n,
            g_sum / n,
            b_sum / n,
            max_bright - min_bright,
            warm_sum / (warm_sum + cool_sum + 0.001),
            saturation_sum / n,
            r_sum / (g_sum + 0.001),
            g_sum / (b_sum + 0.001),
            (r_sum + g_sum) / (b_sum + 0.001),
        ])
    }

    pub fn brightness(&self) -> f32 {
        self.0[0]
    }

    pub fn contrast(&self) -> f32 {
        self.0[4]
    }

    pub fn warmth(&self) -> f32 {
        self.0[5]
    }

    pub fn saturation(&self) -> f32 {
        self.0[6]
    }

    pub fn red_green_ratio(&self) -> f32 {
        self.0[7]
    }
}

#[derive(Clone, Copy, Debug)]
struct Favorite {
    style: StyleParams,
}

#[derive(Clone)]
pub struct PersonalEngine {
    favorites: VecDeque<Favorite>,
    bias: [f32; FEATURE_COUNT],
    learning_strength: i32,
    scene_patterns: [u32; SCENE_COUNT],
    current_scene: Scene,
    total_processed: u64,
}

impl Default for PersonalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PersonalEngine {
    pub fn new() -> Self {
        Self {
            favorites: VecDeque::with_capacity(MAX_FAVORITES),
            bias: [0.5; FEATURE_COUNT],
            learning_strength: DEFAULT_LEARNING_STRENGTH,
            scene_patterns: [0; SCENE_COUNT],
            current_scene: Scene::Portrait,
            total_processed: 0,
        }
    }

    pub fn learning_strength(&self) -> i32 {
        self.learning_strength
    }

    pub fn current_scene(&self) -> Scene {
        self.current_scene
    }

    pub fn total_processed(&self) -> u64 {
        self.total_processed
    }

    pub fn bias(&self) -> &[f32; FEATURE_COUNT] {
        &self.bias
    }

    fn reset_memory(&mut self) {
        self.favorites.clear();
        self.bias = [0.5; FEATURE_COUNT];
        self.scene_patterns = [0; SCENE_COUNT];
        self.current_scene = Scene::Portrait;
        self.total_processed = 0;
    }

    /// Style for the current scene, nudged towards what the favorites look like.
    pub fn personalized_params(&self) -> StyleParams {
        let mut p = StyleParams::default().to_array();

        if !self.favorites.is_empty() {
            let strength = self.learning_strength as f32 / 200.0;
            let bias = &self.bias;

            p[0] += (bias[0] - 0.5) * 0.3 * strength;
            p[1] += (bias[4] - 0.5) * 0.4 * strength;
            p[2] += (bias[6] - 0.5) * 0.4 * strength;
            p[4] = 0.5 + (bias[5] - 0.5) * strength;

            match self.current_scene {
                Scene::Portrait => {
                    p[2] *= 1.1;
                    p[3] *= 0.8;
                    p[4] *= 1.2;
                }
                Scene::Landscape => {
                    p[0] *= 1.15;
                    p[1] *= 1.2;
                    p[2] *= 1.3;
                }
                Scene::LowLight => {
                    p[0] *= 1.3;
                    p[3] *= 0.5;
                }
                Scene::Sunset => {
                    p[4] *= 1.4;
                    p[2] *= 1.25;
                }
                Scene::Indoor => {
                    p[0] *= 1.1;
                    p[3] *= 0.7;
                }
                Scene::Macro => {
                    p[2] *= 1.2;
                    p[3] *= 1.3;
                }
                Scene::Unknown => {}
            }
        }

        StyleParams {
            exposure: p[0].clamp(0.8, 1.8),
            contrast: p[1].clamp(0.8, 1.5),
            saturation: p[2].clamp(0.8, 1.8),
            sharpness: p[3].clamp(0.01, 0.2),
            warmth: p[4].clamp(0.2, 0.8),
        }
    }

    fn most_common_scene(&self) -> Scene {
        let mut best = 0;
        for i in 1..SCENE_COUNT {
            if self.scene_patterns[i] > self.scene_patterns[best] {
                best = i;
            }
        }
        Scene::ALL[best]
    }
}

/// Applies warmth, exposure, contrast and saturation to one pixel.
pub fn enhance_pixel(px: [u8; 3], params: &StyleParams) -> [u8; 3] {
    let mut r = px[0] as f32 / 255.0;
    let mut g = px[1] as f32 / 255.0;
    let mut b = px[2] as f32 / 255.0;

    let warmth = params.warmth;
    if warmth > 0.5 {
        r *= 1.0 + (warmth - 0.5) * 0.4;
        b *= 1.0 - (warmth - 0.5) * 0.3;
    } else {
        b *= 1.0 + (0.5 - warmth) * 0.4;
        r *= 1.0 - (0.5 - warmth) * 0.3;
    }

    r *= params.exposure;
    g *= params.exposure;
    b *= params.exposure;

    r = 0.5 + (r - 0.5) * params.contrast;
    g = 0.5 + (g - 0.5) * params.contrast;
    b = 0.5 + (b - 0.5) * params.contrast;

    let lum = 0.299 * r + 0.587 * g + 0.114 * b;
    r = lum + params.saturation * (r - lum);
    g = lum + params.saturation * (g - lum);
    b = lum + params.saturation * (b - lum);

    [to_byte(r), to_byte(g), to_byte(b)]
}

#[inline]
fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0) as u8
}

impl EnhancementEngine for PersonalEngine {
    fn self_test(&mut self) -> anyhow::Result<()> {
        let params = StyleParams::default();
        let [r, g, b] = enhance_pixel([128, 128, 128], &params);
        ensure!(
            r == g && g == b,
            "neutral gray drifted to ({r}, {g}, {b})"
        );
        ensure!(enhance_pixel([0, 0, 0], &params) != [255, 255, 255], "black maps to white");
        Ok(())
    }

    fn init(&mut self) -> anyhow::Result<()> {
        self.reset_memory();
        self.learning_strength = DEFAULT_LEARNING_STRENGTH;
        log::info!(
            "personal engine initialized: {MAX_FAVORITES} favorites, {FEATURE_COUNT} features, {PARAM_COUNT} parameters"
        );
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
        if input.len() != expected || output.len() != expected {
            bail!(
                "{width}x{height} needs {expected} bytes, got input {} and output {}",
                input.len(),
                output.len()
            );
        }

        self.total_processed += 1;
        let signature = PhotoSignature::extract(input, width, height);
        self.current_scene = Scene::detect(&signature);
        let params = self.personalized_params();

        output
            .par_chunks_exact_mut(3)
            .zip(input.par_chunks_exact(3))
            .for_each(|(dst, src)| {
                dst.copy_from_slice(&enhance_pixel([src[0], src[1], src[2]], &params));
            });

        log::info!(
            "processed image #{} ({width}x{height}) exp={:.2} con={:.2} sat={:.2} warm={:.2} scene={}",
            self.total_processed,
            params.exposure,
            params.contrast,
            params.saturation,
            params.warmth,
            self.current_scene.name()
        );
        Ok(())
    }

    fn add_favorite(&mut self, sample: &FavoriteSample) -> anyhow::Result<()> {
        if self.favorites.len() >= MAX_FAVORITES {
            self.favorites.pop_front();
        }

        let image = &sample.image;
        let signature = PhotoSignature::extract(image.as_bytes(), image.width(), image.height());
        self.favorites.push_back(Favorite {
            style: sample.style,
        });

        let scene = Scene::detect(&signature);
        self.scene_patterns[scene.index()] += 1;
        self.current_scene = scene;

        let rate = 0.1 * (self.learning_strength as f32 / 100.0);
        for (bias, feature) in self.bias.iter_mut().zip(signature.0) {
            *bias = *bias * (1.0 - rate) + feature * rate;
        }

        log::info!(
            "favorite #{} added (scene: {})",
            self.favorites.len(),
            scene.name()
        );
        Ok(())
    }

    fn stats(&mut self) -> anyhow::Result<String> {
        let count = self.favorites.len();
        if count == 0 {
            return Ok(format!(
                "NEURALGRAM AI CAMERA SYSTEM\n\n\
                 Ready to learn your photography style!\n\n\
                 SYSTEM FEATURES:\n\
                 * Personal memory: {MAX_FAVORITES} photos\n\
                 * Scene detection: {SCENE_COUNT} types\n\
                 * Parameter learning: {PARAM_COUNT} params\n\
                 * Offline processing: Yes\n\n\
                 HOW IT WORKS:\n\
                 1. You take photos\n\
                 2. Mark favorites\n\
                 3. AI learns patterns\n\
                 4. Auto-enhances new photos\n\n\
                 All processing happens offline\non your device for privacy!"
            ));
        }

        let n = count as f32;
        let avg_warmth = self.favorites.iter().map(|f| f.style.warmth).sum::<f32>() / n;
        let avg_saturation = self.favorites.iter().map(|f| f.style.saturation).sum::<f32>() / n;

        Ok(format!(
            "NEURALGRAM AI PERSONALITY REPORT\n\n\
             Favorites Learned: {count}\n\
             Learning Strength: {}%\n\
             Images Processed: {}\n\
             Memory Used: {count}/{MAX_FAVORITES}\n\n\
             YOUR PHOTOGRAPHY PROFILE:\n\
             Most Common Scene: {}\n\
             Warmth Preference: {:.0}%\n\
             Saturation Level: {:.0}%\n\
             Contrast Bias: {:.2}\n\n\
             AI STATUS: Active Learning\n\
             Your camera is adapting to\nyour unique photography style!",
            self.learning_strength,
            self.total_processed,
            self.most_common_scene().name(),
            avg_warmth * 100.0,
            avg_saturation * 100.0,
            self.bias[4],
        ))
    }

    fn favorite_count(&mut self) -> anyhow::Result<u32> {
        Ok(self.favorites.len() as u32)
    }

    fn set_learning_strength(&mut self, strength: i32) -> anyhow::Result<()> {
        self.learning_strength = strength;
        log::info!("learning strength updated to {strength}%");
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        self.reset_memory();
        log::info!("personal memory cleared");
        Ok(())
    }

    fn checkpoint(&self) -> Option<Checkpoint> {
        Some(Box::new(self.clone()))
    }

    fn restore(&mut self, checkpoint: Checkpoint) -> anyhow::Result<()> {
        let saved = checkpoint
            .downcast::<Self>()
            .map_err(|_| anyhow!("checkpoint was not taken from a personal engine"))?;
        *self = *saved;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(width: u32, height: u32, value: u8) -> RgbBuffer {
        RgbBuffer::filled(width, height, [value; 3])
    }

    fn favorite(image: RgbBuffer) -> FavoriteSample {
        FavoriteSample::new(image, StyleParams::default())
    }

    fn signature(values: [(usize, f32); 4]) -> PhotoSignature {
        let mut sig = [0.0; FEATURE_COUNT];
        for (i, v) in values {
            sig[i] = v;
        }
        PhotoSignature(sig)
    }

    #[test]
    fn signature_of_uniform_gray() {
        let image = gray(16, 16, 128);
        let sig = PhotoSignature::extract(image.as_bytes(), 16, 16);
        let level = 128.0f32 / 255.0;

        assert!((sig.brightness() - level).abs() < 1e-4);
        assert!((sig.0[1] - level).abs() < 1e-6);
        assert_eq!(sig.contrast(), 0.0);
        assert_eq!(sig.saturation(), 0.0);
        // (r + g/2) / (r + g/2 + b), just under 0.6
        assert!((sig.warmth() - 0.6).abs() < 0.01);
        assert!((sig.red_green_ratio() - 1.0).abs() < 0.01);
    }

    #[test]
    fn signature_samples_every_eighth_pixel() {
        // Only (0,0) and (8,0) are sampled on a 9x1 strip.
        let mut data = vec![0u8; 9 * 3];
        data[0..3].copy_from_slice(&[255, 255, 255]);
        data[24..27].copy_from_slice(&[255, 255, 255]);
        let sig = PhotoSignature::extract(&data, 9, 1);
        assert!((sig.brightness() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn scene_rules_apply_in_order() {
        // dark and flat
        assert_eq!(Scene::detect(&signature([(0, 0.2), (4, 0.1), (5, 0.9), (7, 2.0)])), Scene::LowLight);
        assert_eq!(Scene::detect(&signature([(0, 0.5), (4, 0.5), (5, 0.9), (7, 1.2)])), Scene::Portrait);
        assert_eq!(Scene::detect(&signature([(0, 0.5), (4, 0.5), (5, 0.8), (7, 1.0)])), Scene::Sunset);
        assert_eq!(Scene::detect(&signature([(0, 0.8), (4, 0.5), (5, 0.5), (7, 1.0)])), Scene::Landscape);
        assert_eq!(Scene::detect(&signature([(0, 0.8), (4, 0.1), (6, 0.8), (7, 1.0)])), Scene::Macro);
        assert_eq!(Scene::detect(&signature([(0, 0.5), (4, 0.1), (5, 0.5), (7, 1.0)])), Scene::Indoor);
        assert_eq!(Scene::detect(&signature([(0, 0.9), (4, 0.1), (5, 0.5), (7, 1.0)])), Scene::Unknown);
    }

    #[test]
    fn default_params_without_favorites() {
        let engine = PersonalEngine::new();
        assert_eq!(engine.personalized_params(), StyleParams::default());
    }

    #[test]
    fn gray_frame_with_default_params() {
        let mut engine = PersonalEngine::new();
        engine.init().unwrap();
        let input = gray(4, 4, 128);
        let mut output = vec![0u8; input.len()];

        engine.process(input.as_bytes(), &mut output, 4, 4).unwrap();

        // 128/255 * 1.1 = 0.5522, contrast 1.15 around 0.5 gives 0.56 -> 142
        assert!(output.iter().all(|&c| c == 142), "got {:?}", &output[..3]);
        assert_eq!(engine.total_processed(), 1);
        assert_eq!(engine.current_scene(), Scene::Indoor);
    }

    #[test]
    fn favorites_change_the_result() {
        let mut engine = PersonalEngine::new();
        engine.init().unwrap();
        engine.add_favorite(&favorite(gray(8, 8, 128))).unwrap();

        let input = gray(4, 4, 128);
        let mut output = vec![0u8; input.len()];
        engine.process(input.as_bytes(), &mut output, 4, 4).unwrap();

        // indoor scene boosts exposure by 10%
        let params = engine.personalized_params();
        assert!(params.exposure > 1.2 && params.exposure < 1.22);
        assert!(output[0] > 150, "got {}", output[0]);
    }

    #[test]
    fn process_rejects_mismatched_buffers() {
        let mut engine = PersonalEngine::new();
        let mut output = vec![0u8; 12];
        assert!(engine.process(&[0u8; 11], &mut output, 2, 2).is_err());
        assert!(engine.process(&[0u8; 12], &mut output[..9], 2, 2).is_err());
        assert_eq!(engine.total_processed(), 0);
    }

    #[test]
    fn favorite_updates_bias_with_learning_rate() {
        let mut engine = PersonalEngine::new();
        engine.init().unwrap();
        engine.add_favorite(&favorite(gray(8, 8, 0))).unwrap();

        // rate = 0.1 * 0.75; brightness feature is 0 for black
        assert!((engine.bias()[0] - 0.4625).abs() < 1e-6);
        assert_eq!(engine.favorite_count().unwrap(), 1);
        assert_eq!(engine.current_scene(), Scene::LowLight);
    }

    #[test]
    fn oldest_favorite_is_evicted() {
        let mut engine = PersonalEngine::new();
        engine.init().unwrap();
        for _ in 0..MAX_FAVORITES + 5 {
            engine.add_favorite(&favorite(gray(2, 2, 90))).unwrap();
        }
        assert_eq!(engine.favorite_count().unwrap(), MAX_FAVORITES as u32);
    }

    #[test]
    fn restore_undoes_favorites_and_processing() {
        let mut engine = PersonalEngine::new();
        engine.init().unwrap();
        engine.add_favorite(&favorite(gray(8, 8, 128))).unwrap();
        let saved = engine.checkpoint().unwrap();

        engine.add_favorite(&favorite(gray(8, 8, 20))).unwrap();
        let mut out = vec![0u8; 12];
        engine.process(&[20; 12], &mut out, 2, 2).unwrap();
        assert_eq!(engine.favorite_count().unwrap(), 2);

        engine.restore(saved).unwrap();
        assert_eq!(engine.favorite_count().unwrap(), 1);
        assert_eq!(engine.total_processed(), 0);
        assert_eq!(engine.current_scene(), Scene::Indoor);
    }

    #[test]
    fn restore_rejects_foreign_checkpoints() {
        let mut engine = PersonalEngine::new();
        assert!(engine.restore(Box::new(7u32)).is_err());
    }

    #[test]
    fn clear_keeps_learning_strength() {
        let mut engine = PersonalEngine::new();
        engine.init().unwrap();
        engine.set_learning_strength(20).unwrap();
        engine.add_favorite(&favorite(gray(2, 2, 90))).unwrap();
        let mut out = vec![0u8; 12];
        engine.process(&[90; 12], &mut out, 2, 2).unwrap();

        engine.clear().unwrap();

        assert_eq!(engine.favorite_count().unwrap(), 0);
        assert_eq!(engine.total_processed(), 0);
        assert_eq!(engine.bias(), &[0.5; FEATURE_COUNT]);
        assert_eq!(engine.learning_strength(), 20);
    }

    #[test]
    fn init_restores_default_strength() {
        let mut engine = PersonalEngine::new();
        engine.set_learning_strength(3).unwrap();
        engine.init().unwrap();
        assert_eq!(engine.learning_strength(), 75);
    }

    #[test]
    fn stats_introduce_the_system_without_favorites() {
        let mut engine = PersonalEngine::new();
        engine.init().unwrap();
        let stats = engine.stats().unwrap();
        assert!(stats.starts_with("NEURALGRAM AI CAMERA SYSTEM\n\n"));
        assert!(stats.contains("* Personal memory: 100 photos\n"));
        assert!(stats.contains("* Scene detection: 7 types\n"));
        assert!(stats.contains("* Parameter learning: 5 params\n"));
    }

    #[test]
    fn stats_report_learned_profile() {
        let mut engine = PersonalEngine::new();
        engine.init().unwrap();
        engine.add_favorite(&favorite(gray(8, 8, 128))).unwrap();

        let stats = engine.stats().unwrap();
        assert!(stats.starts_with("NEURALGRAM AI PERSONALITY REPORT\n\n"));
        assert!(stats.contains("Favorites Learned: 1\n"));
        assert!(stats.contains("Learning Strength: 75%\n"));
        assert!(stats.contains("Images Processed: 0\n"));
        assert!(stats.contains("Memory Used: 1/100\n"));
        assert!(stats.contains("Most Common Scene: Indoor\n"));
        assert!(stats.contains("Warmth Preference: 50%\n"));
        assert!(stats.contains("Saturation Level: 120%\n"));
        assert!(stats.contains("Contrast Bias: 0.46\n"));
    }

    #[test]
    fn self_test_passes() {
        assert!(PersonalEngine::new().self_test().is_ok());
    }
}
