//! Scripted engines for exercising the executor without a debugger.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use super::{EngineError, InterruptHandle, NativeCall, NativeEngine, PreparedCall};
use crate::executor::CaptureSink;

/// What a scripted call does once launched.
#[derive(Debug, Clone)]
pub(crate) enum Behaviour {
    /// Prints the command text.
    Echo,
    /// Prints fixed text.
    Reply(String),
    /// Sleeps, ignoring interrupts, then prints `output`.
    Sleep { duration: Duration, output: String },
    /// Prints `partial` and blocks until interrupted.
    Interruptible { partial: String },
    /// Blocks, ignoring interrupts, until the engine is released.
    Hang,
    /// Reports a failure.
    Fail(String),
    /// Panics inside the worker.
    Panic,
}

/// One-shot gate that wakes every waiter when opened.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    open: Mutex<bool>,
    opened: Condvar,
}

impl Latch {
    pub(crate) fn open(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.opened.notify_all();
    }

    pub(crate) fn wait(&self) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        while !*open {
            open = self
                .opened
                .wait(open)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Counters shared by every call of a [`ScriptedEngine`].
#[derive(Debug, Default)]
pub(crate) struct CallStats {
    pub(crate) started: AtomicUsize,
    pub(crate) finished: AtomicUsize,
    pub(crate) interrupts: AtomicUsize,
    active: AtomicUsize,
    pub(crate) peak_concurrency: AtomicUsize,
}

impl CallStats {
    fn enter(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_concurrency.fetch_max(active, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Engine whose calls follow per-prefix scripts; unscripted commands echo.
#[derive(Debug, Default)]
pub(crate) struct ScriptedEngine {
    scripts: Mutex<Vec<(String, Behaviour)>>,
    unavailable: AtomicBool,
    release: Arc<Latch>,
    stats: Arc<CallStats>,
}

impl ScriptedEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Scripts every command starting with `prefix`.
    pub(crate) fn script(self, prefix: &str, behaviour: Behaviour) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((prefix.to_owned(), behaviour));
        self
    }

    /// Makes every subsequent preparation fail.
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Lets every [`Behaviour::Hang`] call return.
    pub(crate) fn release_hung(&self) {
        self.release.open();
    }

    pub(crate) fn stats(&self) -> Arc<CallStats> {
        Arc::clone(&self.stats)
    }

    fn behaviour_for(&self, command: &str) -> Behaviour {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map_or(Behaviour::Echo, |(_, behaviour)| behaviour.clone())
    }
}

impl NativeEngine for ScriptedEngine {
    fn prepare(&self, command: &str) -> Result<PreparedCall, EngineError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable {
                reason: "scripted engine offline".to_owned(),
            });
        }
        let interrupt = Arc::new(ScriptedInterrupt {
            latch: Latch::default(),
            stats: Arc::clone(&self.stats),
        });
        let call = ScriptedCall {
            command: command.to_owned(),
            behaviour: self.behaviour_for(command),
            interrupt: Arc::clone(&interrupt),
            release: Arc::clone(&self.release),
            stats: Arc::clone(&self.stats),
        };
        Ok(PreparedCall::new(Box::new(call), interrupt))
    }
}

struct ScriptedInterrupt {
    latch: Latch,
    stats: Arc<CallStats>,
}

impl InterruptHandle for ScriptedInterrupt {
    fn interrupt(&self) {
        self.stats.interrupts.fetch_add(1, Ordering::SeqCst);
        self.latch.open();
    }
}

struct ScriptedCall {
    command: String,
    behaviour: Behaviour,
    interrupt: Arc<ScriptedInterrupt>,
    release: Arc<Latch>,
    stats: Arc<CallStats>,
}

impl NativeCall for ScriptedCall {
    fn run(self: Box<Self>, sink: &mut CaptureSink) -> Result<(), EngineError> {
        let Self {
            command,
            behaviour,
            interrupt,
            release,
            stats,
        } = *self;
        stats.enter();
        let result = match behaviour {
            Behaviour::Echo => {
                sink.push(&command);
                Ok(())
            }
            Behaviour::Reply(text) => {
                sink.push(&text);
                Ok(())
            }
            Behaviour::Sleep { duration, output } => {
                thread::sleep(duration);
                sink.push(&output);
                Ok(())
            }
            Behaviour::Interruptible { partial } => {
                sink.push_line(&partial);
                interrupt.latch.wait();
                Ok(())
            }
            Behaviour::Hang => {
                release.wait();
                sink.push("released");
                Ok(())
            }
            Behaviour::Fail(message) => Err(EngineError::Failed { message }),
            Behaviour::Panic => {
                stats.leave();
                panic!("scripted native call panicked");
            }
        };
        stats.leave();
        result
    }
}
