use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::{Receiver, unbounded};
use neuralgram::{
    config::PipelineConfig,
    engine::{EnhancementBridge, FavoriteSample, PersonalEngine},
    pipeline::{
        CaptureCompletion, CaptureOrchestrator, DisplaySurface, FileCamera, PatternCamera,
        PermissionState, PermissionSwitch, RequestId, codec,
    },
    types::DisplayBitmap,
};

const PATTERN_SIZE: (u32, u32) = (640, 480);

enum Source {
    Image(PathBuf),
    Pattern,
    #[cfg(feature = "camera-nokhwa")]
    Camera(u32),
}

struct Options {
    source: Source,
    strength: Option<i32>,
    timeout: Option<Duration>,
    list_cameras: bool,
    native: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options> {
    let mut options = Options {
        source: Source::Pattern,
        strength: None,
        timeout: None,
        list_cameras: false,
        native: false,
    };

    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .ok_or_else(|| anyhow!("{name} needs a value"))
        };
        match arg.as_str() {
            "--image" => options.source = Source::Image(PathBuf::from(value("--image")?)),
            "--pattern" => options.source = Source::Pattern,
            "--camera" => {
                let index: u32 = value("--camera")?
                    .parse()
                    .context("--camera expects a device index")?;
                #[cfg(feature = "camera-nokhwa")]
                {
                    options.source = Source::Camera(index);
                }
                #[cfg(not(feature = "camera-nokhwa"))]
                {
                    bail!("camera {index} requested but built without the `camera-nokhwa` feature");
                }
            }
            "--list-cameras" => options.list_cameras = true,
            "--strength" => {
                options.strength = Some(
                    value("--strength")?
                        .parse()
                        .context("--strength expects an integer")?,
                )
            }
            "--timeout-ms" => {
                let millis: u64 = value("--timeout-ms")?
                    .parse()
                    .context("--timeout-ms expects milliseconds")?;
                options.timeout = Some(Duration::from_millis(millis));
            }
            "--native" => options.native = true,
            other => bail!("unknown argument `{other}`"),
        }
    }

    Ok(options)
}

#[derive(Debug, PartialEq)]
enum Command {
    Capture,
    Favorite,
    Stats,
    Count,
    Strength(i32),
    Clear,
    Save(PathBuf),
    Revoke,
    Grant,
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            bail!("empty command");
        };
        let rest: Vec<&str> = parts.collect();

        let command = match (name, rest.as_slice()) {
            ("capture" | "c", []) => Command::Capture,
            ("favorite" | "f", []) => Command::Favorite,
            ("stats", []) => Command::Stats,
            ("count", []) => Command::Count,
            ("strength", [value]) => Command::Strength(
                value
                    .parse()
                    .with_context(|| format!("`{value}` is not an integer"))?,
            ),
            ("clear", []) => Command::Clear,
            ("save", [path]) => Command::Save(PathBuf::from(path)),
            ("revoke", []) => Command::Revoke,
            ("grant", []) => Command::Grant,
            ("help" | "?", []) => Command::Help,
            ("quit" | "q" | "exit", []) => Command::Quit,
            _ => bail!("unrecognized command `{}`", line.trim()),
        };
        Ok(command)
    }
}

const HELP: &str = "commands: capture, favorite, stats, count, strength <0-100>, clear, \
                    save <path>, revoke, grant, help, quit";

struct App {
    orchestrator: CaptureOrchestrator,
    completion_rx: Receiver<CaptureCompletion>,
    bridge: Option<EnhancementBridge>,
    permission: PermissionSwitch,
    config: PipelineConfig,
    latest_photo: Option<DisplayBitmap>,
    /// Report shown after the last capture, favorite or clear.
    stats: Option<String>,
}

impl App {
    fn run(&mut self, input: impl BufRead) -> Result<()> {
        println!("{HELP}");
        prompt()?;

        for line in input.lines() {
            let line = line.context("failed to read command")?;
            self.drain_completions();

            if !line.trim().is_empty() {
                match Command::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => self.handle(command),
                    Err(err) => println!("{err:#}"),
                }
            }
            prompt()?;
        }
        Ok(())
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Capture => self.capture(),
            Command::Favorite => self.add_favorite(),
            Command::Stats => {
                if self.require_bridge().is_some() {
                    self.refresh_stats();
                }
            }
            Command::Count => match self.require_bridge().map(|bridge| bridge.favorite_count()) {
                Some(Ok(count)) => println!("{count} favorites"),
                Some(Err(err)) => println!("Count unavailable: {err}"),
                None => {}
            },
            Command::Strength(value) => {
                let clamped = value.clamp(0, 100);
                match self
                    .require_bridge()
                    .map(|bridge| bridge.set_learning_strength(value))
                {
                    Some(Ok(())) => println!("Learning strength: {clamped}%"),
                    Some(Err(err)) => println!("Could not update learning strength: {err}"),
                    None => {}
                }
            }
            Command::Clear => match self.require_bridge().map(|bridge| bridge.clear()) {
                Some(Ok(())) => {
                    println!("Memory cleared");
                    self.refresh_stats();
                }
                Some(Err(err)) => println!("Could not clear memory: {err}"),
                None => {}
            },
            Command::Save(path) => match &self.latest_photo {
                Some(photo) => match photo.save(&path) {
                    Ok(()) => println!("Saved {}", path.display()),
                    Err(err) => println!("Save failed: {err}"),
                },
                None => println!("Capture a photo first!"),
            },
            Command::Revoke => {
                self.permission.set(PermissionState::Denied);
                self.notify_permission(PermissionState::Denied);
            }
            Command::Grant => {
                self.permission.set(PermissionState::Granted);
                self.notify_permission(PermissionState::Granted);
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
    }

    fn refresh_stats(&mut self) {
        let Some(bridge) = &self.bridge else {
            return;
        };
        match bridge.stats() {
            Ok(stats) => {
                println!("{stats}");
                self.stats = Some(stats);
            }
            Err(err) => println!("Stats unavailable: {err}"),
        }
    }

    fn require_bridge(&self) -> Option<&EnhancementBridge> {
        if self.bridge.is_none() {
            println!("Enhancement engine is unavailable");
        }
        self.bridge.as_ref()
    }

    fn notify_permission(&self, state: PermissionState) {
        match self.orchestrator.permission_changed(state) {
            Ok(()) if self.orchestrator.is_session_active() => println!("Camera ready"),
            Ok(()) => println!("Camera permission denied"),
            Err(err) => println!("Camera error: {err}"),
        }
    }

    fn capture(&mut self) {
        let id = match self.orchestrator.request_capture() {
            Ok(id) => id,
            Err(err) => {
                println!("Camera not ready: {err}");
                return;
            }
        };
        println!("Processing image...");
        self.wait_for(id);
    }

    fn wait_for(&mut self, id: RequestId) {
        let budget = self.config.capture_timeout.unwrap_or(Duration::from_secs(30))
            + self.config.boundary_timeout;

        loop {
            match self.completion_rx.recv_timeout(budget) {
                Ok(completion) => {
                    let done = completion.id == id;
                    self.apply_completion(completion);
                    if done {
                        return;
                    }
                }
                Err(_) => {
                    println!("Capture #{id} is still running; its result will show up later");
                    return;
                }
            }
        }
    }

    /// Completions that arrived while the prompt was idle.
    fn drain_completions(&mut self) {
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.apply_completion(completion);
        }
    }

    fn apply_completion(&mut self, completion: CaptureCompletion) {
        match completion.result {
            Ok(photo) => {
                let message = if photo.enhanced {
                    "Photo enhanced"
                } else {
                    "Photo captured (enhancement disabled)"
                };
                println!(
                    "{message}: {}x{} in {:?}",
                    photo.bitmap.width(),
                    photo.bitmap.height(),
                    photo.elapsed
                );
                self.latest_photo = Some(photo.bitmap);
                self.refresh_stats();
            }
            Err(err) => println!("Capture failed: {err}"),
        }
    }

    fn add_favorite(&mut self) {
        let Some(photo) = &self.latest_photo else {
            println!("Capture a photo first!");
            return;
        };
        let Some(bridge) = self.require_bridge() else {
            return;
        };

        let sample = FavoriteSample::new(codec::pack(photo), self.config.favorite_style);
        match bridge
            .add_favorite(sample)
            .and_then(|()| bridge.favorite_count())
        {
            Ok(count) => {
                println!("Favorite added! ({count} total)");
                self.refresh_stats();
            }
            Err(err) => println!("Could not add favorite: {err}"),
        }
    }
}

fn prompt() -> Result<()> {
    print!("> ");
    io::stdout().flush().context("failed to flush stdout")
}

fn start_bridge(options: &Options, config: &PipelineConfig) -> neuralgram::Result<EnhancementBridge> {
    #[cfg(feature = "native-engine")]
    {
        if options.native {
            return EnhancementBridge::start(neuralgram::engine::NativeEngine::new(), config);
        }
    }
    #[cfg(not(feature = "native-engine"))]
    {
        if options.native {
            log::warn!("built without the `native-engine` feature; using the bundled engine");
        }
    }
    EnhancementBridge::start(PersonalEngine::new(), config)
}

fn spawn_orchestrator(
    source: &Source,
    bridge: Option<EnhancementBridge>,
    config: &PipelineConfig,
) -> Result<(CaptureOrchestrator, Receiver<CaptureCompletion>, PermissionSwitch)> {
    let (completion_tx, completion_rx) = unbounded();

    let (orchestrator, permission) = match source {
        Source::Image(path) => {
            let camera = FileCamera::new(path);
            let permission = camera.permission_switch();
            let orchestrator = CaptureOrchestrator::spawn(camera, bridge, config, completion_tx)?;
            (orchestrator, permission)
        }
        Source::Pattern => {
            let camera = PatternCamera::new(PATTERN_SIZE.0, PATTERN_SIZE.1);
            let permission = camera.permission_switch();
            let orchestrator = CaptureOrchestrator::spawn(camera, bridge, config, completion_tx)?;
            (orchestrator, permission)
        }
        #[cfg(feature = "camera-nokhwa")]
        Source::Camera(index) => {
            let camera = neuralgram::pipeline::camera::NokhwaCamera::new(
                nokhwa::utils::CameraIndex::Index(*index),
            );
            let permission = camera.permission_switch();
            let orchestrator = CaptureOrchestrator::spawn(camera, bridge, config, completion_tx)?;
            (orchestrator, permission)
        }
    };

    Ok((orchestrator, completion_rx, permission))
}

#[cfg(feature = "camera-nokhwa")]
fn list_cameras() -> Result<()> {
    let cameras = neuralgram::pipeline::camera::available_cameras()?;
    if cameras.is_empty() {
        println!("no cameras available");
    }
    for camera in cameras {
        println!("{}: {}", camera.index, camera.label);
    }
    Ok(())
}

#[cfg(not(feature = "camera-nokhwa"))]
fn list_cameras() -> Result<()> {
    bail!("built without the `camera-nokhwa` feature")
}

fn main() -> Result<()> {
    env_logger::init();

    let options = parse_args(std::env::args().skip(1))?;
    if options.list_cameras {
        return list_cameras();
    }

    let config = PipelineConfig::builder()
        .learning_strength(options.strength)
        .capture_timeout(options.timeout.or(PipelineConfig::default().capture_timeout))
        .build();

    let bridge = match start_bridge(&options, &config) {
        Ok(bridge) => Some(bridge),
        Err(err) => {
            log::error!("enhancement engine failed to start: {err}");
            println!("Native library error: {err}; photos will not be enhanced");
            None
        }
    };

    let (orchestrator, completion_rx, permission) =
        spawn_orchestrator(&options.source, bridge.clone(), &config)?;
    match orchestrator.start(DisplaySurface::new("terminal")) {
        Ok(()) => println!("Camera ready"),
        Err(err) => println!("Camera error: {err}"),
    }

    let mut app = App {
        orchestrator,
        completion_rx,
        bridge,
        permission,
        config,
        latest_photo: None,
        stats: None,
    };
    app.run(io::stdin().lock())
}
