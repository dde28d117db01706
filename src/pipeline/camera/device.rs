use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail, ensure};
use crossbeam_channel::{Sender, bounded, unbounded};
use nokhwa::{
    Buffer, Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraIndex, CameraInfo, FrameFormat, RequestedFormat, RequestedFormatType,
    },
};
use rayon::prelude::*;
use yuv::{YuvPackedImage, YuvRange, YuvStandardMatrix, yuyv422_to_rgba};

use super::{CameraBackend, DisplaySurface, FrameCallback, PermissionState, PermissionSwitch};
use crate::types::CapturedFrame;

const REQUEST_POLL_INTERVAL: Duration = Duration::from_millis(100);

// Formats the pipeline can take without a lossy detour. Built-in macOS
// cameras often reject YUYV even though Nokhwa reports it.
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::MJPEG,
    FrameFormat::NV12,
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::YUYV,
    FrameFormat::GRAY,
];

fn requested_formats() -> [RequestedFormat<'static>; 3] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestResolution,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

impl From<&CameraInfo> for CameraDevice {
    fn from(info: &CameraInfo) -> Self {
        Self {
            index: info.index().clone(),
            label: info.human_name(),
        }
    }
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let devices = query(ApiBackend::Auto).context("failed to enumerate cameras")?;
    Ok(devices.iter().map(CameraDevice::from).collect())
}

/// Tries each requested format in turn until a stream opens.
fn open_device(index: &CameraIndex) -> Result<Camera> {
    let mut failures = Vec::new();

    for requested in requested_formats() {
        let opened = Camera::new(index.clone(), requested).and_then(|mut camera| {
            camera.open_stream()?;
            Ok(camera)
        });
        match opened {
            Ok(camera) => return Ok(camera),
            Err(err) => failures.push(err.to_string()),
        }
    }

    bail!("could not open camera {index}: {}", failures.join("; "))
}

struct CaptureThread {
    request_tx: Sender<FrameCallback>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A physical camera. The device handle stays on its own thread; picture
/// requests are forwarded to it.
pub struct NokhwaCamera {
    index: CameraIndex,
    permission: PermissionSwitch,
    stream: Option<CaptureThread>,
}

impl NokhwaCamera {
    pub fn new(index: CameraIndex) -> Self {
        Self {
            index,
            permission: PermissionSwitch::default(),
            stream: None,
        }
    }

    pub fn permission_switch(&self) -> PermissionSwitch {
        self.permission.clone()
    }
}

impl CameraBackend for NokhwaCamera {
    fn label(&self) -> String {
        format!("camera {}", self.index)
    }

    fn permission(&self) -> PermissionState {
        self.permission.state()
    }

    fn bind(&mut self, surface: &DisplaySurface) -> Result<()> {
        self.unbind();

        let index = self.index.clone();
        let (request_tx, request_rx) = unbounded::<FrameCallback>();
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::spawn(move || {
            let mut camera = match open_device(&index) {
                Ok(camera) => {
                    let _ = ready_tx.send(Ok(()));
                    camera
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };

            while !stop_flag.load(Ordering::Relaxed) {
                let Ok(callback) = request_rx.recv_timeout(REQUEST_POLL_INTERVAL) else {
                    continue;
                };
                match camera.frame() {
                    Ok(buffer) => match captured_frame(&buffer) {
                        Ok(frame) => {
                            let _ = callback.success(frame);
                        }
                        Err(err) => callback.failure(format!("{err:#}")),
                    },
                    Err(err) => callback.failure(format!("camera frame read failed: {err}")),
                }
            }

            if let Err(err) = camera.stop_stream() {
                log::warn!("failed to stop camera stream: {err:?}");
            }
        });

        let stream = CaptureThread {
            request_tx,
            stop,
            handle: Some(handle),
        };
        ready_rx
            .recv()
            .map_err(|_| anyhow!("camera thread exited before opening the device"))??;

        log::info!("bound {} to {}", self.label(), surface.name);
        self.stream = Some(stream);
        Ok(())
    }

    fn unbind(&mut self) {
        if self.stream.take().is_some() {
            log::info!("released {}", self.label());
        }
    }

    fn take_picture(&mut self, callback: FrameCallback) {
        let Some(stream) = &self.stream else {
            callback.failure("camera is not bound");
            return;
        };
        if let Err(err) = stream.request_tx.send(callback) {
            err.into_inner().failure("camera thread has stopped");
        }
    }
}

/// Maps a device buffer onto the pipeline's frame formats. Compressed and
/// planar frames pass through; packed layouts are expanded to RGBA here.
fn captured_frame(buffer: &Buffer) -> Result<CapturedFrame> {
    let resolution = buffer.resolution();
    let (width, height) = (resolution.width_x, resolution.height_y);
    let data = buffer.buffer();

    let frame = match buffer.source_frame_format() {
        FrameFormat::MJPEG => CapturedFrame::jpeg(data.to_vec(), width, height),
        FrameFormat::NV12 => {
            let (y, u, v) = split_nv12(data, width, height)?;
            CapturedFrame::yuv420(y, u, v, width, height)
        }
        packed => CapturedFrame::rgba(expand_to_rgba(packed, data, width, height)?, width, height),
    };
    Ok(frame)
}

/// Deinterleaves the NV12 chroma plane into separate U and V planes.
fn split_nv12(data: &[u8], width: u32, height: u32) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    ensure!(
        width % 2 == 0 && height % 2 == 0,
        "NV12 frame {width}x{height} must have even dimensions"
    );
    let y_len = width as usize * height as usize;
    let uv_len = y_len / 2;
    ensure!(
        data.len() >= y_len + uv_len,
        "NV12 buffer too small: got {}, expected {}",
        data.len(),
        y_len + uv_len
    );

    let (u, v) = data[y_len..y_len + uv_len]
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .unzip();
    Ok((data[..y_len].to_vec(), u, v))
}

fn bytes_per_pixel(format: FrameFormat) -> Option<usize> {
    match format {
        FrameFormat::YUYV => Some(2),
        FrameFormat::RAWRGB | FrameFormat::RAWBGR => Some(3),
        FrameFormat::GRAY => Some(1),
        FrameFormat::MJPEG | FrameFormat::NV12 => None,
    }
}

/// Expands one of the packed device layouts to opaque RGBA.
fn expand_to_rgba(format: FrameFormat, data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let Some(stride) = bytes_per_pixel(format) else {
        bail!("{format:?} frames are not packed pixels");
    };
    let pixels = width as usize * height as usize;
    ensure!(
        data.len() >= pixels * stride,
        "{format:?} frame {width}x{height} needs {} bytes, got {}",
        pixels * stride,
        data.len()
    );

    let mut rgba = vec![u8::MAX; pixels * 4];
    if format == FrameFormat::YUYV {
        let packed = YuvPackedImage {
            yuy: data,
            yuy_stride: width * 2,
            width,
            height,
        };
        yuyv422_to_rgba(
            &packed,
            &mut rgba,
            width * 4,
            YuvRange::Full,
            YuvStandardMatrix::Bt601,
        )
        .map_err(|err| anyhow!("YUYV422 to RGBA failed: {err:?}"))?;
        return Ok(rgba);
    }

    rgba.par_chunks_exact_mut(4)
        .zip(data.par_chunks_exact(stride))
        .for_each(|(dst, src)| {
            let rgb = match (format, src) {
                (FrameFormat::RAWBGR, &[b, g, r]) => [r, g, b],
                (_, &[r, g, b]) => [r, g, b],
                (_, &[luma]) => [luma; 3],
                _ => [0; 3],
            };
            dst[..3].copy_from_slice(&rgb);
        });
    Ok(rgba)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_chroma_is_deinterleaved() {
        let mut data = vec![50u8; 4 * 2];
        data.extend_from_slice(&[10, 20, 11, 21]);
        let (y, u, v) = split_nv12(&data, 4, 2).unwrap();
        assert_eq!(y, vec![50; 8]);
        assert_eq!(u, vec![10, 11]);
        assert_eq!(v, vec![20, 21]);
    }

    #[test]
    fn nv12_rejects_short_buffers() {
        assert!(split_nv12(&[0; 10], 4, 2).is_err());
        assert!(split_nv12(&[0; 12], 3, 2).is_err());
    }

    #[test]
    fn bgr_is_swapped() {
        let rgba = expand_to_rgba(FrameFormat::RAWBGR, &[1, 2, 3], 1, 1).unwrap();
        assert_eq!(rgba, vec![3, 2, 1, 255]);
    }

    #[test]
    fn rgb_keeps_channel_order() {
        let rgba = expand_to_rgba(FrameFormat::RAWRGB, &[1, 2, 3, 4, 5, 6], 2, 1).unwrap();
        assert_eq!(rgba, vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn gray_expands_to_opaque_rgba() {
        let rgba = expand_to_rgba(FrameFormat::GRAY, &[9, 200], 2, 1).unwrap();
        assert_eq!(rgba, vec![9, 9, 9, 255, 200, 200, 200, 255]);
    }

    #[test]
    fn packed_layouts_reject_short_buffers() {
        assert!(expand_to_rgba(FrameFormat::RAWRGB, &[0; 5], 2, 1).is_err());
        assert!(expand_to_rgba(FrameFormat::YUYV, &[0; 6], 2, 2).is_err());
        assert!(expand_to_rgba(FrameFormat::MJPEG, &[0; 64], 2, 2).is_err());
    }
}
