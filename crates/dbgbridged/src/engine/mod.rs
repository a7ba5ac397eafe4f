//! Seam between the executor and the native debugger.
//!
//! A [`NativeEngine`] prepares one call at a time. Preparation is where a
//! missing or dead session is detected; the returned [`PreparedCall`] pairs the
//! blocking call with an [`InterruptHandle`] the executor can fire from another
//! thread when the call overruns its deadline. Interrupts are cooperative: the
//! call may ignore them.

mod console;
#[cfg(test)]
pub(crate) mod test_doubles;

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::executor::CaptureSink;

pub use self::console::ConsoleEngine;

pub(crate) const ENGINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::engine");

/// Errors raised while preparing or running a native call.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No debugger program is configured.
    #[error("no debugger engine is configured")]
    NotConfigured,
    /// The session cannot accept commands.
    #[error("debugger session unavailable: {reason}")]
    Unavailable {
        /// Why the session is unavailable.
        reason: String,
    },
    /// Starting the debugger process failed.
    #[error("failed to launch debugger '{program}': {source}")]
    Launch {
        /// The debugger program that failed to start.
        program: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Talking to the debugger failed.
    #[error("debugger I/O failed: {source}")]
    Io {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The debugger exited before the call completed.
    #[error("debugger exited before the command completed")]
    Exited,
    /// The debugger reported that the command failed.
    #[error("{message}")]
    Failed {
        /// The debugger's failure message.
        message: String,
    },
}

impl EngineError {
    /// Whether the failure means no session could run the call at all.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::NotConfigured | Self::Unavailable { .. } | Self::Exited
        )
    }
}

/// A blocking, non-preemptible call into the debugger.
pub trait NativeCall: Send + 'static {
    /// Runs the call, writing everything it prints into `sink`.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the call fails.
    fn run(self: Box<Self>, sink: &mut CaptureSink) -> Result<(), EngineError>;
}

/// Requests that a running call stop early.
pub trait InterruptHandle: Send + Sync {
    /// Asks the call to stop. Must not block.
    fn interrupt(&self);
}

/// A call ready to launch with its interrupt handle.
pub struct PreparedCall {
    call: Box<dyn NativeCall>,
    interrupt: Arc<dyn InterruptHandle>,
}

impl PreparedCall {
    /// Pairs a call with its interrupt handle.
    pub fn new(call: Box<dyn NativeCall>, interrupt: Arc<dyn InterruptHandle>) -> Self {
        Self { call, interrupt }
    }

    /// Splits the call from its interrupt handle.
    #[must_use]
    pub fn into_parts(self) -> (Box<dyn NativeCall>, Arc<dyn InterruptHandle>) {
        (self.call, self.interrupt)
    }
}

impl std::fmt::Debug for PreparedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedCall").finish_non_exhaustive()
    }
}

/// Source of native calls for the executor.
pub trait NativeEngine: Send + Sync + 'static {
    /// Prepares `command` for execution.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when no session can run the command.
    fn prepare(&self, command: &str) -> Result<PreparedCall, EngineError>;
}

/// Engine used when no debugger is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableEngine;

impl NativeEngine for UnavailableEngine {
    fn prepare(&self, _command: &str) -> Result<PreparedCall, EngineError> {
        Err(EngineError::NotConfigured)
    }
}
