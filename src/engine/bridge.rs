//! Serialized, deadline-bounded access to an [`EnhancementEngine`].
//!
//! The engine lives on a dedicated boundary thread. Every call is shipped to
//! that thread as a job and executed one at a time; callers wait for the reply
//! until the configured deadline and are released with an error afterwards.
//!
//! A mutating call that fails, or that finishes after its caller gave up, is
//! rolled back to the engine's checkpoint. Engines without checkpoints keep
//! such late effects; those are counted in
//! [`EnhancementBridge::late_completions`].

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};

use super::{EnhancementEngine, FavoriteSample};
use crate::{
    config::PipelineConfig,
    error::{PipelineError, Result},
    types::RgbBuffer,
};

pub const MIN_LEARNING_STRENGTH: i32 = 0;
pub const MAX_LEARNING_STRENGTH: i32 = 100;

type Job = Box<dyn FnOnce(&mut dyn EnhancementEngine) + Send>;

enum Command {
    Run {
        op: &'static str,
        ticket: Arc<Ticket>,
        job: Job,
    },
    Shutdown,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

const PENDING: u8 = 0;
const ANSWERED: u8 = 1;
const ABANDONED: u8 = 2;

/// Decides one call's fate: the worker answering or the caller giving up,
/// whichever happens first.
struct Ticket(AtomicU8);

impl Ticket {
    fn new() -> Self {
        Self(AtomicU8::new(PENDING))
    }

    fn answer(&self) -> bool {
        self.settle(ANSWERED)
    }

    fn abandon(&self) -> bool {
        self.settle(ABANDONED)
    }

    fn is_abandoned(&self) -> bool {
        self.0.load(Ordering::SeqCst) == ABANDONED
    }

    fn settle(&self, outcome: u8) -> bool {
        self.0
            .compare_exchange(PENDING, outcome, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

struct Shared {
    command_tx: Sender<Command>,
    timeout: Duration,
    busy: Arc<AtomicBool>,
    late_completions: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let _ = self.command_tx.send(Command::Shutdown);
        let Some(handle) = self.handle.take() else {
            return;
        };
        if self.busy.load(Ordering::SeqCst) {
            log::warn!("engine is still busy with a timed out call; detaching its worker");
            return;
        }
        if handle.join().is_err() {
            log::warn!("engine worker thread panicked during shutdown");
        }
    }
}

/// Cloneable handle to the engine worker. The worker stops when the last
/// handle is dropped.
#[derive(Clone)]
pub struct EnhancementBridge {
    shared: Arc<Shared>,
}

impl EnhancementBridge {
    /// Spawns the worker, then runs the engine's self-test and `init`.
    /// Either failing is fatal and nothing is left running.
    pub fn start<E: EnhancementEngine>(engine: E, config: &PipelineConfig) -> Result<Self> {
        let (command_tx, command_rx) = unbounded();
        let busy = Arc::new(AtomicBool::new(false));
        let worker_busy = busy.clone();
        let late_completions = Arc::new(AtomicU64::new(0));

        let handle = thread::Builder::new()
            .name("enhancement-bridge".to_string())
            .spawn(move || run_boundary_loop(engine, command_rx, worker_busy))?;

        let bridge = Self {
            shared: Arc::new(Shared {
                command_tx,
                timeout: config.boundary_timeout,
                busy,
                late_completions,
                handle: Some(handle),
            }),
        };

        bridge.call("self_test", Access::Read, |engine| engine.self_test())?;
        bridge.call("init", Access::Read, |engine| engine.init())?;
        if let Some(strength) = config.learning_strength {
            bridge.set_learning_strength(strength)?;
        }

        log::info!("enhancement engine ready");
        Ok(bridge)
    }

    /// Returns a new buffer of the same dimensions. On failure nothing is
    /// returned, so callers never observe a half-written image.
    pub fn process(&self, input: RgbBuffer) -> Result<RgbBuffer> {
        self.call("process", Access::Write, move |engine| {
            let (width, height) = (input.width(), input.height());
            let mut output = vec![0u8; input.len()];
            engine.process(input.as_bytes(), &mut output, width, height)?;
            Ok(RgbBuffer::from_packed(output, width, height))
        })
    }

    pub fn add_favorite(&self, sample: FavoriteSample) -> Result<()> {
        self.call("add_favorite", Access::Write, move |engine| {
            engine.add_favorite(&sample)
        })
    }

    pub fn stats(&self) -> Result<String> {
        self.call("stats", Access::Read, |engine| engine.stats())
    }

    pub fn favorite_count(&self) -> Result<u32> {
        self.call("favorite_count", Access::Read, |engine| {
            engine.favorite_count()
        })
    }

    /// Clamps to `0..=100` before the value reaches the engine.
    pub fn set_learning_strength(&self, strength: i32) -> Result<()> {
        let strength = strength.clamp(MIN_LEARNING_STRENGTH, MAX_LEARNING_STRENGTH);
        self.call("set_learning_strength", Access::Write, move |engine| {
            engine.set_learning_strength(strength)
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.call("clear", Access::Write, |engine| engine.clear())
    }

    /// Mutating calls that completed after their caller had already been
    /// told they failed, on an engine that could not roll them back.
    pub fn late_completions(&self) -> u64 {
        self.shared.late_completions.load(Ordering::SeqCst)
    }

    fn call<T, F>(&self, op: &'static str, access: Access, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn EnhancementEngine) -> anyhow::Result<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = bounded(1);
        let deadline = Instant::now() + self.shared.timeout;
        let ticket = Arc::new(Ticket::new());
        let worker_ticket = ticket.clone();
        let late_completions = self.shared.late_completions.clone();

        let job: Job = Box::new(move |engine| {
            let checkpoint = match access {
                Access::Write => engine.checkpoint(),
                Access::Read => None,
            };
            let result = match panic::catch_unwind(AssertUnwindSafe(|| f(&mut *engine))) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(PipelineError::boundary(op, format!("{err:#}"))),
                Err(payload) => Err(PipelineError::boundary(
                    op,
                    format!("engine panicked: {}", panic_message(payload.as_ref())),
                )),
            };

            let answered = worker_ticket.answer();
            if result.is_err() || !answered {
                match checkpoint {
                    Some(checkpoint) => {
                        if let Err(err) = engine.restore(checkpoint) {
                            log::error!("failed to roll back engine call `{op}`: {err:#}");
                        } else if !answered {
                            log::warn!("rolled back engine call `{op}` that finished after its deadline");
                        }
                    }
                    None if !answered && access == Access::Write => {
                        late_completions.fetch_add(1, Ordering::SeqCst);
                        log::warn!("engine call `{op}` finished after its deadline; its effects were kept");
                    }
                    None => {}
                }
            }
            if answered {
                let _ = reply_tx.send(result);
            }
        });

        self.shared
            .command_tx
            .send(Command::Run { op, ticket: ticket.clone(), job })
            .map_err(|_| PipelineError::boundary(op, "engine worker has stopped"))?;

        let dropped = || PipelineError::boundary(op, "request dropped by the engine worker");
        match reply_rx.recv_deadline(deadline) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) if ticket.abandon() => {
                log::warn!("engine call `{op}` timed out after {:?}", self.shared.timeout);
                Err(PipelineError::boundary(
                    op,
                    format!("no reply within {:?}", self.shared.timeout),
                ))
            }
            // The worker answered right at the deadline; its reply is on the way.
            Err(RecvTimeoutError::Timeout) => reply_rx.recv().unwrap_or_else(|_| Err(dropped())),
            Err(RecvTimeoutError::Disconnected) => Err(dropped()),
        }
    }
}

fn run_boundary_loop<E: EnhancementEngine>(
    mut engine: E,
    command_rx: Receiver<Command>,
    busy: Arc<AtomicBool>,
) {
    while let Ok(Command::Run { op, ticket, job }) = command_rx.recv() {
        if ticket.is_abandoned() {
            log::warn!("skipping expired engine call `{op}`");
            continue;
        }

        busy.store(true, Ordering::SeqCst);
        job(&mut engine);
        busy.store(false, Ordering::SeqCst);
    }
    log::debug!("engine worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
