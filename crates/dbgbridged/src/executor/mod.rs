//! Deadline-bounded execution of native debugger calls.
//!
//! A native call blocks its thread and cannot be preempted. The executor
//! therefore runs every call on a dedicated worker thread and waits for its
//! completion on a channel for at most the caller's timeout. When the deadline
//! passes it fires the call's interrupt handle and waits a further grace
//! period. A call that still has not returned is detached: its thread keeps
//! running, its eventual result is dropped, and the executor returns a timeout
//! to the caller.
//!
//! Detaching leaks one thread and one stuck native call for as long as the
//! debugger keeps it blocked. That is accepted so a hung command can never
//! wedge the connection that issued it. The abandoned call keeps the global
//! [`ExecutionGate`] closed until it really returns, so later commands time out
//! instead of running concurrently against a session that is still busy.
//!
//! Output is captured into a [`CaptureSink`] owned by the execution. The sink
//! moves into the worker and comes back over the completion channel; on detach
//! the worker drops it.

mod capture;
mod gate;

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use dbgbridge_config::DEFAULT_GRACE_PERIOD_MS;

use crate::engine::{EngineError, InterruptHandle, NativeEngine};
use crate::session::SessionState;

pub use self::capture::{CaptureSink, is_effectively_empty};
pub use self::gate::{ExecutionGate, GateTicket};

pub(crate) const EXECUTOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::executor");

/// Text appended to output salvaged from an interrupted call.
pub const INTERRUPTED_SUFFIX: &str = "(interrupted)";

/// Outcome of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Everything the call printed, possibly partial.
    pub output: String,
    /// The call did not complete successfully.
    pub failed: bool,
    /// The call overran its timeout.
    pub timed_out: bool,
    /// No session was available to run the call.
    pub session_unavailable: bool,
    /// Human readable failure description.
    pub error_detail: Option<String>,
    /// Wall time from submission to result.
    pub elapsed: Duration,
}

impl ExecutionResult {
    fn completed(output: String, status: Result<(), EngineError>, elapsed: Duration) -> Self {
        match status {
            Ok(()) => Self {
                output,
                failed: false,
                timed_out: false,
                session_unavailable: false,
                error_detail: None,
                elapsed,
            },
            Err(error) => Self {
                output,
                failed: true,
                timed_out: false,
                session_unavailable: error.is_unavailable(),
                error_detail: Some(error.to_string()),
                elapsed,
            },
        }
    }

    fn setup_failed(error: &EngineError, elapsed: Duration) -> Self {
        Self {
            output: String::new(),
            failed: true,
            timed_out: false,
            session_unavailable: error.is_unavailable(),
            error_detail: Some(error.to_string()),
            elapsed,
        }
    }

    fn timed_out(output: String, detail: String, elapsed: Duration) -> Self {
        Self {
            output,
            failed: true,
            timed_out: true,
            session_unavailable: false,
            error_detail: Some(detail),
            elapsed,
        }
    }

    /// Whether the output carries anything beyond the no-result marker.
    #[must_use]
    pub fn has_output(&self) -> bool {
        !is_effectively_empty(&self.output)
    }
}

struct Completion {
    sink: CaptureSink,
    status: Result<(), EngineError>,
}

/// Runs native calls under a deadline with cooperative cancellation.
pub struct CommandExecutor {
    engine: Arc<dyn NativeEngine>,
    gate: ExecutionGate,
    grace: Duration,
    session: Arc<SessionState>,
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("grace", &self.grace)
            .field("gate_busy", &self.gate.is_busy())
            .finish_non_exhaustive()
    }
}

impl CommandExecutor {
    /// Creates an executor over `engine` with the default grace period.
    #[must_use]
    pub fn new(engine: Arc<dyn NativeEngine>, session: Arc<SessionState>) -> Self {
        Self {
            engine,
            gate: ExecutionGate::new(),
            grace: Duration::from_millis(DEFAULT_GRACE_PERIOD_MS),
            session,
        }
    }

    /// Overrides the wait granted after an interrupt.
    #[must_use]
    pub const fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Wait granted to an interrupted call before it is detached.
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        self.grace
    }

    /// Runs `command`, returning within roughly `timeout` plus the grace
    /// period no matter what the native call does.
    pub fn execute(&self, command: &str, timeout: Duration) -> ExecutionResult {
        let started = Instant::now();
        let result = self.run(command, timeout, started);
        self.session.record_execution(&result);
        debug!(
            target: EXECUTOR_TARGET,
            command,
            elapsed_ms = result.elapsed.as_millis(),
            failed = result.failed,
            timed_out = result.timed_out,
            "execution finished"
        );
        result
    }

    fn run(&self, command: &str, timeout: Duration, started: Instant) -> ExecutionResult {
        let deadline = started + timeout;
        let Some(ticket) = self.gate.acquire_until(deadline) else {
            warn!(
                target: EXECUTOR_TARGET,
                command,
                timeout_ms = timeout.as_millis(),
                "session still busy with an earlier call"
            );
            return ExecutionResult::timed_out(
                String::new(),
                format!(
                    "command timed out after {} ms waiting for an earlier command to finish",
                    timeout.as_millis()
                ),
                started.elapsed(),
            );
        };

        let (call, interrupt) = match self.engine.prepare(command) {
            Ok(prepared) => prepared.into_parts(),
            Err(error) => {
                debug!(target: EXECUTOR_TARGET, command, %error, "native call setup failed");
                return ExecutionResult::setup_failed(&error, started.elapsed());
            }
        };

        let (sender, completion) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("dbgbridge-native".to_owned())
            .spawn(move || {
                let mut sink = CaptureSink::new();
                let status = call.run(&mut sink);
                drop(ticket);
                // The receiver is gone when the executor detached this call.
                let _ = sender.send(Completion { sink, status });
            });
        let worker = match spawned {
            Ok(worker) => worker,
            Err(error) => {
                warn!(target: EXECUTOR_TARGET, command, %error, "failed to spawn native worker");
                return ExecutionResult::completed(
                    String::new(),
                    Err(EngineError::Io { source: error }),
                    started.elapsed(),
                );
            }
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        match completion.recv_timeout(remaining) {
            Ok(done) => {
                join_worker(worker);
                ExecutionResult::completed(done.sink.into_output(), done.status, started.elapsed())
            }
            Err(RecvTimeoutError::Disconnected) => {
                join_worker(worker);
                ExecutionResult::completed(
                    String::new(),
                    Err(EngineError::Failed {
                        message: "native call panicked".to_owned(),
                    }),
                    started.elapsed(),
                )
            }
            Err(RecvTimeoutError::Timeout) => {
                self.cancel(command, timeout, started, worker, &completion, interrupt.as_ref())
            }
        }
    }

    fn cancel(
        &self,
        command: &str,
        timeout: Duration,
        started: Instant,
        worker: JoinHandle<()>,
        completion: &mpsc::Receiver<Completion>,
        interrupt: &dyn InterruptHandle,
    ) -> ExecutionResult {
        let detail = format!("command timed out after {} ms", timeout.as_millis());
        warn!(
            target: EXECUTOR_TARGET,
            command,
            timeout_ms = timeout.as_millis(),
            "deadline passed; interrupting native call"
        );
        interrupt.interrupt();

        match completion.recv_timeout(self.grace) {
            Ok(done) => {
                join_worker(worker);
                let partial = done.sink.into_output();
                let output = if partial.trim().is_empty() {
                    INTERRUPTED_SUFFIX.to_owned()
                } else {
                    format!("{}\n{INTERRUPTED_SUFFIX}", partial.trim_end())
                };
                ExecutionResult::timed_out(output, detail, started.elapsed())
            }
            Err(RecvTimeoutError::Disconnected) => {
                join_worker(worker);
                ExecutionResult::timed_out(String::new(), detail, started.elapsed())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    target: EXECUTOR_TARGET,
                    command,
                    grace_ms = self.grace.as_millis(),
                    "native call ignored interrupt; detaching worker"
                );
                self.session.record_detached();
                drop(worker);
                ExecutionResult::timed_out(String::new(), detail, started.elapsed())
            }
        }
    }
}

fn join_worker(worker: JoinHandle<()>) {
    if worker.join().is_err() {
        warn!(target: EXECUTOR_TARGET, "native worker panicked");
    }
}
