//! Camera backends and the one-shot callback they deliver frames through.

#[cfg(feature = "camera-nokhwa")]
mod device;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded};

use super::color::required_chroma_len;
use crate::types::CapturedFrame;

#[cfg(feature = "camera-nokhwa")]
pub use device::{CameraDevice, NokhwaCamera, available_cameras};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
}

/// Shared camera permission flag. The platform (or the shell simulating it)
/// flips it; backends report it when a session is bound.
#[derive(Clone, Debug)]
pub struct PermissionSwitch {
    granted: Arc<AtomicBool>,
}

impl Default for PermissionSwitch {
    fn default() -> Self {
        Self {
            granted: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl PermissionSwitch {
    pub fn set(&self, state: PermissionState) {
        self.granted
            .store(state == PermissionState::Granted, Ordering::SeqCst);
    }

    pub fn state(&self) -> PermissionState {
        if self.granted.load(Ordering::SeqCst) {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        }
    }
}

/// Where the live preview is shown while a session is bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplaySurface {
    pub name: String,
}

impl DisplaySurface {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Outcome of one picture request.
pub type FrameOutcome = std::result::Result<CapturedFrame, String>;

/// Handed to [`CameraBackend::take_picture`]; consumed by exactly one of
/// [`success`](Self::success) or [`failure`](Self::failure). Dropping it
/// unanswered counts as a failure.
#[derive(Debug)]
pub struct FrameCallback {
    tx: Sender<FrameOutcome>,
}

impl FrameCallback {
    pub fn new() -> (Self, Receiver<FrameOutcome>) {
        let (tx, rx) = bounded(1);
        (Self { tx }, rx)
    }

    /// Gives the frame back when nobody is waiting for it anymore.
    pub fn success(self, frame: CapturedFrame) -> std::result::Result<(), CapturedFrame> {
        match self.tx.try_send(Ok(frame)) {
            Ok(()) => Ok(()),
            Err(err) => match err.into_inner() {
                Ok(frame) => Err(frame),
                Err(_) => Ok(()),
            },
        }
    }

    pub fn failure(self, reason: impl Into<String>) {
        let _ = self.tx.try_send(Err(reason.into()));
    }
}

/// Platform capture session.
///
/// All methods are called from the orchestrator's capture worker only.
pub trait CameraBackend: Send + 'static {
    fn label(&self) -> String;

    fn permission(&self) -> PermissionState;

    fn bind(&mut self, surface: &DisplaySurface) -> Result<()>;

    fn unbind(&mut self);

    /// Starts a capture. The frame may be delivered from any thread.
    fn take_picture(&mut self, callback: FrameCallback);

    /// Returns a delivered frame's buffers to the backend once decoded.
    fn release(&mut self, frame: CapturedFrame) {
        drop(frame);
    }
}

/// Replays one still image from disk on every capture.
///
/// JPEG files are delivered compressed so they go through the JPEG decoder;
/// anything else the `image` crate reads is delivered as packed RGBA.
pub struct FileCamera {
    path: PathBuf,
    permission: PermissionSwitch,
    loaded: Option<CapturedFrame>,
}

impl FileCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            permission: PermissionSwitch::default(),
            loaded: None,
        }
    }

    pub fn permission_switch(&self) -> PermissionSwitch {
        self.permission.clone()
    }

    fn load(path: &Path) -> Result<CapturedFrame> {
        let is_jpeg = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));

        if is_jpeg {
            let (width, height) = image::image_dimensions(path)
                .with_context(|| format!("failed to read JPEG header of {}", path.display()))?;
            let data =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            return Ok(CapturedFrame::jpeg(data, width, height));
        }

        let rgba = image::open(path)
            .with_context(|| format!("failed to open image {}", path.display()))?
            .to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(CapturedFrame::rgba(rgba.into_raw(), width, height))
    }
}

impl CameraBackend for FileCamera {
    fn label(&self) -> String {
        format!("file {}", self.path.display())
    }

    fn permission(&self) -> PermissionState {
        self.permission.state()
    }

    fn bind(&mut self, surface: &DisplaySurface) -> Result<()> {
        let frame = Self::load(&self.path)?;
        log::info!(
            "bound {} ({}x{} {}) to {}",
            self.label(),
            frame.width,
            frame.height,
            frame.format.label(),
            surface.name
        );
        self.loaded = Some(frame);
        Ok(())
    }

    fn unbind(&mut self) {
        self.loaded = None;
    }

    fn take_picture(&mut self, callback: FrameCallback) {
        match &self.loaded {
            Some(frame) => {
                let mut frame = frame.clone();
                frame.timestamp = std::time::Instant::now();
                let _ = callback.success(frame);
            }
            None => callback.failure("no image loaded"),
        }
    }
}

/// Synthetic camera producing planar 4:2:0 frames with a drifting gradient.
pub struct PatternCamera {
    width: u32,
    height: u32,
    permission: PermissionSwitch,
    bound: bool,
    frame_index: u32,
}

impl PatternCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            permission: PermissionSwitch::default(),
            bound: false,
            frame_index: 0,
        }
    }

    pub fn permission_switch(&self) -> PermissionSwitch {
        self.permission.clone()
    }

    fn render(&self) -> CapturedFrame {
        let (w, h) = (self.width as usize, self.height as usize);
        let shift = self.frame_index as usize * 8;
        let span = (w + h).max(1);

        let mut y = Vec::with_capacity(w * h);
        for row in 0..h {
            for col in 0..w {
                y.push((((row + col + shift) % span) * 255 / span) as u8);
            }
        }

        let chroma_len = required_chroma_len(self.width, self.height);
        let stride = (w / 2).max(1);
        let mut u = Vec::with_capacity(chroma_len);
        let mut v = Vec::with_capacity(chroma_len);
        for i in 0..chroma_len {
            let (row, col) = (i / stride, i % stride);
            u.push((96 + col * 64 / stride) as u8);
            v.push((160 - row * 64 / h.max(1)) as u8);
        }

        CapturedFrame::yuv420(y, u, v, self.width, self.height)
    }
}

impl CameraBackend for PatternCamera {
    fn label(&self) -> String {
        format!("pattern {}x{}", self.width, self.height)
    }

    fn permission(&self) -> PermissionState {
        self.permission.state()
    }

    fn bind(&mut self, surface: &DisplaySurface) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!(
                "pattern size {}x{} is empty",
                self.width,
                self.height
            ));
        }
        self.bound = true;
        log::info!("bound {} to {}", self.label(), surface.name);
        Ok(())
    }

    fn unbind(&mut self) {
        self.bound = false;
    }

    fn take_picture(&mut self, callback: FrameCallback) {
        if !self.bound {
            callback.failure("pattern camera is not bound");
            return;
        }
        let frame = self.render();
        self.frame_index = self.frame_index.wrapping_add(1);
        let _ = callback.success(frame);
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::{pipeline::decoder::decode_frame, types::FrameFormat};

    #[test]
    fn callback_delivers_exactly_one_outcome() {
        let (callback, rx) = FrameCallback::new();
        let frame = CapturedFrame::rgba(vec![0; 4], 1, 1);
        assert!(callback.success(frame).is_ok());
        assert!(matches!(rx.try_recv(), Ok(Ok(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn callback_returns_frame_when_nobody_waits() {
        let (callback, rx) = FrameCallback::new();
        drop(rx);
        let frame = CapturedFrame::rgba(vec![1, 2, 3, 4], 1, 1);
        let returned = callback.success(frame).unwrap_err();
        assert_eq!(returned.planes[0], vec![1, 2, 3, 4]);
    }

    #[test]
    fn dropped_callback_disconnects() {
        let (callback, rx) = FrameCallback::new();
        drop(callback);
        assert!(rx.recv().is_err());
    }

    #[test]
    fn pattern_frames_decode_and_drift() {
        let mut camera = PatternCamera::new(7, 5);
        camera.bind(&DisplaySurface::new("test")).unwrap();

        let (first, rx1) = FrameCallback::new();
        camera.take_picture(first);
        let frame1 = rx1.recv().unwrap().unwrap();
        let (second, rx2) = FrameCallback::new();
        camera.take_picture(second);
        let frame2 = rx2.recv().unwrap().unwrap();

        assert_eq!(frame1.format, FrameFormat::Yuv420);
        assert_ne!(frame1.planes[0], frame2.planes[0]);
        let bitmap = decode_frame(&frame1).unwrap();
        assert_eq!((bitmap.width(), bitmap.height()), (7, 5));
    }

    #[test]
    fn unbound_pattern_camera_fails() {
        let mut camera = PatternCamera::new(4, 4);
        let (callback, rx) = FrameCallback::new();
        camera.take_picture(callback);
        assert!(rx.recv().unwrap().is_err());
    }

    #[test]
    fn file_camera_delivers_jpeg_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.jpg");
        RgbImage::from_pixel(12, 6, Rgb([30, 160, 60]))
            .save(&path)
            .unwrap();

        let mut camera = FileCamera::new(&path);
        camera.bind(&DisplaySurface::new("test")).unwrap();
        let (callback, rx) = FrameCallback::new();
        camera.take_picture(callback);
        let frame = rx.recv().unwrap().unwrap();

        assert_eq!(frame.format, FrameFormat::Jpeg);
        assert_eq!((frame.width, frame.height), (12, 6));
        assert!(decode_frame(&frame).is_ok());
    }

    #[test]
    fn file_camera_delivers_png_as_rgba() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        RgbImage::from_pixel(3, 2, Rgb([1, 2, 3])).save(&path).unwrap();

        let mut camera = FileCamera::new(&path);
        camera.bind(&DisplaySurface::new("test")).unwrap();
        let (callback, rx) = FrameCallback::new();
        camera.take_picture(callback);
        let frame = rx.recv().unwrap().unwrap();

        assert_eq!(frame.format, FrameFormat::Rgba8888);
        assert_eq!(&frame.planes[0][..4], &[1, 2, 3, 255]);
    }

    #[test]
    fn file_camera_bind_fails_for_missing_file() {
        let mut camera = FileCamera::new("/nonexistent/still.png");
        assert!(camera.bind(&DisplaySurface::new("test")).is_err());
    }

    #[test]
    fn permission_switch_is_shared() {
        let camera = PatternCamera::new(2, 2);
        let switch = camera.permission_switch();
        switch.set(PermissionState::Denied);
        assert_eq!(camera.permission(), PermissionState::Denied);
    }
}
