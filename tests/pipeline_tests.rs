use std::time::Duration;

use crossbeam_channel::{Receiver, unbounded};
use image::{Rgb, RgbImage};
use neuralgram::{
    PipelineConfig, PipelineError,
    engine::{EnhancementBridge, FavoriteSample, PersonalEngine, StyleParams},
    pipeline::{
        CaptureCompletion, CaptureOrchestrator, CapturePhase, DisplaySurface, FileCamera,
        PatternCamera, PermissionState, codec,
    },
    types::DisplayBitmap,
};

fn recv(rx: &Receiver<CaptureCompletion>) -> CaptureCompletion {
    rx.recv_timeout(Duration::from_secs(10)).unwrap()
}

fn capture(orchestrator: &CaptureOrchestrator, rx: &Receiver<CaptureCompletion>) -> DisplayBitmap {
    let id = orchestrator.request_capture().unwrap();
    let completion = recv(rx);
    assert_eq!(completion.id, id);
    let photo = completion.result.unwrap();
    assert!(photo.enhanced);
    photo.bitmap
}

#[test]
fn pattern_capture_is_enhanced_and_favorited() {
    let config = PipelineConfig::default();
    let bridge = EnhancementBridge::start(PersonalEngine::new(), &config).unwrap();
    let (tx, rx) = unbounded();
    let orchestrator =
        CaptureOrchestrator::spawn(PatternCamera::new(64, 48), Some(bridge.clone()), &config, tx)
            .unwrap();
    orchestrator.start(DisplaySurface::new("test")).unwrap();

    let bitmap = capture(&orchestrator, &rx);
    assert_eq!((bitmap.width(), bitmap.height()), (64, 48));
    assert_eq!(bitmap.pixel(10, 10)[3], 255);
    assert_eq!(orchestrator.phase(), CapturePhase::Idle);

    let stats_before = bridge.stats().unwrap();
    assert!(stats_before.contains("Ready to learn"));

    bridge
        .add_favorite(FavoriteSample::new(codec::pack(&bitmap), StyleParams::default()))
        .unwrap();
    assert_eq!(bridge.favorite_count().unwrap(), 1);

    let stats = bridge.stats().unwrap();
    assert!(stats.contains("Favorites Learned: 1\n"));
    assert!(stats.contains("Images Processed: 1\n"));
    assert!(stats.contains("Learning Strength: 75%"));
}

#[test]
fn learning_strength_is_clamped_through_the_bridge() {
    let config = PipelineConfig::builder().learning_strength(Some(20)).build();
    let bridge = EnhancementBridge::start(PersonalEngine::new(), &config).unwrap();
    bridge
        .add_favorite(FavoriteSample::new(
            neuralgram::types::RgbBuffer::filled(4, 4, [120, 120, 120]),
            StyleParams::default(),
        ))
        .unwrap();
    assert!(bridge.stats().unwrap().contains("Learning Strength: 20%"));

    bridge.set_learning_strength(150).unwrap();
    assert!(bridge.stats().unwrap().contains("Learning Strength: 100%"));

    bridge.set_learning_strength(-5).unwrap();
    assert!(bridge.stats().unwrap().contains("Learning Strength: 0%"));

    bridge.clear().unwrap();
    assert_eq!(bridge.favorite_count().unwrap(), 0);
}

#[test]
fn file_capture_can_be_saved() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("still.jpg");
    RgbImage::from_pixel(16, 8, Rgb([90, 90, 90]))
        .save(&input)
        .unwrap();

    let config = PipelineConfig::default();
    let bridge = EnhancementBridge::start(PersonalEngine::new(), &config).unwrap();
    let (tx, rx) = unbounded();
    let orchestrator =
        CaptureOrchestrator::spawn(FileCamera::new(&input), Some(bridge), &config, tx).unwrap();
    orchestrator.start(DisplaySurface::new("test")).unwrap();

    let bitmap = capture(&orchestrator, &rx);
    let output = dir.path().join("enhanced.png");
    bitmap.save(&output).unwrap();

    let reloaded = image::open(&output).unwrap().to_rgba8();
    assert_eq!(reloaded.dimensions(), (16, 8));
    assert_eq!(reloaded.as_raw(), bitmap.as_raw());
}

#[test]
fn revoked_permission_blocks_capture_until_granted() {
    let config = PipelineConfig::default();
    let camera = PatternCamera::new(8, 8);
    let permission = camera.permission_switch();
    let (tx, rx) = unbounded();
    let orchestrator = CaptureOrchestrator::spawn(camera, None, &config, tx).unwrap();
    orchestrator.start(DisplaySurface::new("test")).unwrap();

    permission.set(PermissionState::Denied);
    orchestrator
        .permission_changed(PermissionState::Denied)
        .unwrap();
    assert!(!orchestrator.is_session_active());
    assert!(matches!(
        orchestrator.request_capture(),
        Err(PipelineError::CaptureNotReady(_))
    ));

    permission.set(PermissionState::Granted);
    orchestrator
        .permission_changed(PermissionState::Granted)
        .unwrap();
    assert!(orchestrator.is_session_active());

    orchestrator.request_capture().unwrap();
    let photo = recv(&rx).result.unwrap();
    assert!(!photo.enhanced);
}
