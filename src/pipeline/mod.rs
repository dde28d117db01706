pub mod camera;
pub mod codec;
pub mod color;
pub mod decoder;
pub mod orchestrator;

// Re-exports for convenience
pub use camera::{
    CameraBackend, DisplaySurface, FileCamera, FrameCallback, PatternCamera, PermissionState,
    PermissionSwitch,
};
pub use decoder::decode_frame;
pub use orchestrator::{CaptureCompletion, CaptureOrchestrator, CapturePhase, DeliveredPhoto, RequestId};
