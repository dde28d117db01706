//! Single-in-flight capture state machine running on a dedicated worker.
//!
//! `request_capture` answers synchronously (accepted or busy); the photo
//! arrives later as a [`CaptureCompletion`] on the channel given at spawn.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};

use super::{
    camera::{CameraBackend, DisplaySurface, FrameCallback, FrameOutcome, PermissionState},
    codec,
    decoder::decode_frame,
};
use crate::{
    config::PipelineConfig,
    engine::EnhancementBridge,
    error::{PipelineError, Result},
    types::{CapturedFrame, DisplayBitmap},
};

const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub type RequestId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CapturePhase {
    Idle = 0,
    Capturing = 1,
    Decoding = 2,
    Enhancing = 3,
    Delivered = 4,
    Failed = 5,
}

impl CapturePhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CapturePhase::Capturing,
            2 => CapturePhase::Decoding,
            3 => CapturePhase::Enhancing,
            4 => CapturePhase::Delivered,
            5 => CapturePhase::Failed,
            _ => CapturePhase::Idle,
        }
    }
}

/// A finished photo ready for display.
#[derive(Clone, Debug)]
pub struct DeliveredPhoto {
    pub bitmap: DisplayBitmap,
    /// False when no engine is available and the raw frame is shown.
    pub enhanced: bool,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct CaptureCompletion {
    pub id: RequestId,
    pub result: Result<DeliveredPhoto>,
}

enum WorkerCommand {
    Bind {
        surface: DisplaySurface,
        reply: Sender<Result<()>>,
    },
    Unbind,
    Capture {
        id: RequestId,
    },
    Shutdown,
}

struct SharedState {
    phase: AtomicU8,
    session_active: AtomicBool,
}

impl SharedState {
    fn set_phase(&self, phase: CapturePhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    fn phase(&self) -> CapturePhase {
        CapturePhase::from_u8(self.phase.load(Ordering::SeqCst))
    }
}

pub struct CaptureOrchestrator {
    state: Arc<SharedState>,
    command_tx: Sender<WorkerCommand>,
    next_id: AtomicU64,
    last_surface: Mutex<Option<DisplaySurface>>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CaptureOrchestrator {
    /// Moves the camera onto a new capture worker. No session is bound until
    /// [`start`](Self::start). Without a bridge, captures are delivered
    /// unenhanced.
    pub fn spawn<C: CameraBackend>(
        camera: C,
        bridge: Option<EnhancementBridge>,
        config: &PipelineConfig,
        completion_tx: Sender<CaptureCompletion>,
    ) -> Result<Self> {
        let state = Arc::new(SharedState {
            phase: AtomicU8::new(CapturePhase::Idle as u8),
            session_active: AtomicBool::new(false),
        });
        let (command_tx, command_rx) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        let worker = CaptureWorker {
            camera,
            bridge,
            state: state.clone(),
            stop: stop.clone(),
            capture_timeout: config.capture_timeout,
            completion_tx,
        };
        let handle = thread::Builder::new()
            .name("capture-worker".to_string())
            .spawn(move || worker.run(command_rx))?;

        Ok(Self {
            state,
            command_tx,
            next_id: AtomicU64::new(1),
            last_surface: Mutex::new(None),
            stop,
            handle: Some(handle),
        })
    }

    /// Binds the camera session to `surface`, replacing any bound session.
    pub fn start(&self, surface: DisplaySurface) -> Result<()> {
        *self
            .last_surface
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(surface.clone());

        let (reply_tx, reply_rx) = bounded(1);
        self.command_tx
            .send(WorkerCommand::Bind {
                surface,
                reply: reply_tx,
            })
            .map_err(|_| PipelineError::SessionBindError("capture worker has stopped".into()))?;
        reply_rx
            .recv()
            .map_err(|_| PipelineError::SessionBindError("capture worker has stopped".into()))
            .and_then(|result| result)
    }

    /// Accepts a capture when a session is bound and nothing is in flight.
    pub fn request_capture(&self) -> Result<RequestId> {
        if !self.is_session_active() {
            return Err(PipelineError::CaptureNotReady(
                "no camera session is bound".into(),
            ));
        }
        self.state
            .phase
            .compare_exchange(
                CapturePhase::Idle as u8,
                CapturePhase::Capturing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|_| PipelineError::CaptureNotReady("a capture is already in flight".into()))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if self.command_tx.send(WorkerCommand::Capture { id }).is_err() {
            self.state.set_phase(CapturePhase::Idle);
            return Err(PipelineError::CaptureNotReady(
                "capture worker has stopped".into(),
            ));
        }
        log::debug!("capture #{id} accepted");
        Ok(id)
    }

    /// Revocation tears the session down at once; a grant rebinds the last
    /// surface passed to [`start`](Self::start).
    pub fn permission_changed(&self, state: PermissionState) -> Result<()> {
        match state {
            PermissionState::Denied => {
                log::warn!("camera permission revoked");
                self.teardown();
                Ok(())
            }
            PermissionState::Granted => {
                let surface = self
                    .last_surface
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match surface {
                    Some(surface) if !self.is_session_active() => {
                        log::info!("camera permission granted, rebinding {}", surface.name);
                        self.start(surface)
                    }
                    _ => Ok(()),
                }
            }
        }
    }

    /// New captures are refused at once; the worker unbinds after any
    /// command already queued ahead of this one.
    pub fn teardown(&self) {
        self.state.session_active.store(false, Ordering::SeqCst);
        let _ = self.command_tx.send(WorkerCommand::Unbind);
    }

    pub fn is_session_active(&self) -> bool {
        self.state.session_active.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> CapturePhase {
        self.state.phase()
    }
}

impl Drop for CaptureOrchestrator {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.command_tx.send(WorkerCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct CaptureWorker<C> {
    camera: C,
    bridge: Option<EnhancementBridge>,
    state: Arc<SharedState>,
    stop: Arc<AtomicBool>,
    capture_timeout: Option<Duration>,
    completion_tx: Sender<CaptureCompletion>,
}

impl<C: CameraBackend> CaptureWorker<C> {
    fn run(mut self, command_rx: Receiver<WorkerCommand>) {
        let mut bound = false;

        while !self.stop.load(Ordering::Relaxed) {
            let command = match command_rx.recv_timeout(WORKER_POLL_INTERVAL) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            match command {
                WorkerCommand::Bind { surface, reply } => {
                    if bound {
                        self.camera.unbind();
                    }
                    let result = self.bind(&surface);
                    bound = result.is_ok();
                    self.state.session_active.store(bound, Ordering::SeqCst);
                    let _ = reply.send(result);
                }
                WorkerCommand::Unbind => {
                    self.state.session_active.store(false, Ordering::SeqCst);
                    if bound {
                        self.camera.unbind();
                        bound = false;
                        log::info!("camera session torn down");
                    }
                }
                WorkerCommand::Capture { id } => self.capture(id),
                WorkerCommand::Shutdown => break,
            }
        }

        if bound {
            self.camera.unbind();
        }
        log::debug!("capture worker stopped");
    }

    fn bind(&mut self, surface: &DisplaySurface) -> Result<()> {
        if self.camera.permission() == PermissionState::Denied {
            log::warn!("cannot bind {}: permission denied", self.camera.label());
            return Err(PipelineError::PermissionDenied);
        }
        self.camera.bind(surface).map_err(|err| {
            log::error!("failed to bind {}: {err:?}", self.camera.label());
            PipelineError::SessionBindError(format!("{err:#}"))
        })
    }

    fn capture(&mut self, id: RequestId) {
        let started = Instant::now();
        let result = self.run_pipeline().map(|(bitmap, enhanced)| DeliveredPhoto {
            bitmap,
            enhanced,
            elapsed: started.elapsed(),
        });

        match &result {
            Ok(photo) => {
                self.state.set_phase(CapturePhase::Delivered);
                log::info!(
                    "capture #{id} delivered {}x{} in {:?}",
                    photo.bitmap.width(),
                    photo.bitmap.height(),
                    photo.elapsed
                );
            }
            Err(err) => {
                self.state.set_phase(CapturePhase::Failed);
                log::warn!("capture #{id} failed: {err}");
            }
        }

        self.state.set_phase(CapturePhase::Idle);
        if self
            .completion_tx
            .send(CaptureCompletion { id, result })
            .is_err()
        {
            log::warn!("capture #{id} finished but nobody is listening");
        }
    }

    fn run_pipeline(&mut self) -> Result<(DisplayBitmap, bool)> {
        if !self.state.session_active.load(Ordering::SeqCst) {
            return Err(PipelineError::CaptureNotReady(
                "camera session was torn down".into(),
            ));
        }

        let (callback, frame_rx) = FrameCallback::new();
        self.camera.take_picture(callback);
        let frame = self.wait_for_frame(&frame_rx)?;

        self.state.set_phase(CapturePhase::Decoding);
        let decoded = decode_frame(&frame);
        self.camera.release(frame);
        let bitmap = decoded?;

        self.state.set_phase(CapturePhase::Enhancing);
        let Some(bridge) = &self.bridge else {
            return Ok((bitmap, false));
        };
        let (width, height) = (bitmap.width(), bitmap.height());
        let enhanced = bridge.process(codec::pack(&bitmap))?;
        let bitmap = codec::unpack(enhanced.into_raw(), width, height)?;
        Ok((bitmap, true))
    }

    fn wait_for_frame(&mut self, frame_rx: &Receiver<FrameOutcome>) -> Result<CapturedFrame> {
        let deadline = self.capture_timeout.map(|timeout| Instant::now() + timeout);

        loop {
            match frame_rx.recv_timeout(WORKER_POLL_INTERVAL) {
                Ok(Ok(frame)) => return Ok(frame),
                Ok(Err(reason)) => return Err(PipelineError::CaptureFailed(reason)),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(PipelineError::CaptureFailed(
                        "camera dropped the request".into(),
                    ));
                }
                Err(RecvTimeoutError::Timeout) => {}
            }

            if self.stop.load(Ordering::Relaxed) {
                return Err(PipelineError::CaptureFailed("capture worker stopping".into()));
            }
            if !self.state.session_active.load(Ordering::SeqCst) {
                return Err(PipelineError::CaptureFailed(
                    "camera session was torn down".into(),
                ));
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(PipelineError::CaptureFailed(format!(
                    "camera did not deliver a frame within {:?}",
                    self.capture_timeout.unwrap_or_default()
                )));
            }
        }
    }
}
