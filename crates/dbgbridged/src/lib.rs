//! Command bridge between local clients and a native debugging session.
//!
//! The daemon listens on a local channel (Unix socket or loopback TCP) and
//! speaks newline-delimited JSON. Each request names a registered command;
//! the daemon runs it and answers with exactly one response carrying the
//! request's correlation id. Commands that reach the debugger go through a
//! [`CommandExecutor`], which bounds every call by a deadline, interrupts the
//! engine when the deadline passes and detaches from calls that ignore the
//! interrupt so the connection keeps serving.
//!
//! The pieces compose bottom-up:
//!
//! - [`protocol`] frames and types the wire messages.
//! - [`dispatch`] owns the command registry and turns frames into responses.
//! - [`executor`] runs debugger commands under a deadline.
//! - [`Server`] accepts connections and serves each one on its own worker.
//! - [`run_daemon`] wires configuration, telemetry, the engine and the
//!   built-in commands together and supervises the server until shutdown.

mod commands;
mod console;
pub mod dispatch;
pub mod engine;
pub mod executor;
mod health;
mod process;
pub mod protocol;
mod server;
mod session;
mod telemetry;
mod transport;

pub use commands::{
    CommandContext, MAX_OUTPUT_BYTES, TimeoutCategory, classify, effective_timeout,
    register_builtin, suggestion_for,
};
pub use console::OperatorCommand;
pub use dispatch::{CommandError, CommandHandler, CommandRegistry, RegistryError};
pub use engine::{ConsoleEngine, EngineError, NativeEngine, UnavailableEngine};
pub use executor::{CommandExecutor, ExecutionResult};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_daemon};
pub use server::{ConnectionId, Server, ServerError};
pub use session::{SessionSnapshot, SessionState};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::ListenerError;

#[cfg(test)]
mod tests;
