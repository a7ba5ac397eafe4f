//! Built-in commands served by the daemon.
//!
//! Every command that touches the debugger goes through the shared
//! [`CommandExecutor`], so each one inherits its deadline, interrupt and
//! detach behaviour. Handlers translate an [`ExecutionResult`] into either
//! reply text or a classified [`CommandError`].

mod args;
mod basic;
mod classify;
mod diagnostics;
mod execute;
mod extended;
mod timeouts;

use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::CommandError;
use crate::executor::{CommandExecutor, ExecutionResult};
use crate::protocol::{Reply, Request};
use crate::server::{Server, ServerError};
use crate::session::SessionState;

pub use self::classify::{classify, suggestion_for};
pub use self::timeouts::{TimeoutCategory, effective_timeout};

/// Largest output returned before truncation.
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Collaborators shared by the built-in handlers.
#[derive(Debug)]
pub struct CommandContext {
    executor: Arc<CommandExecutor>,
    session: Arc<SessionState>,
    default_timeout: Duration,
}

impl CommandContext {
    /// Bundles the executor and session used by every built-in.
    #[must_use]
    pub fn new(
        executor: Arc<CommandExecutor>,
        session: Arc<SessionState>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            executor,
            session,
            default_timeout,
        }
    }

    /// Timeout used when a request does not carry `timeout_ms`.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Session statistics shared with the executor.
    #[must_use]
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Runs `command` and returns its output or a classified error.
    pub(crate) fn run(&self, command: &str, timeout: Duration) -> Result<String, CommandError> {
        let result = self.executor.execute(command, timeout);
        outcome(command, timeout, result)
    }

    /// Runs `command`, reporting the raw result.
    pub(crate) fn execute(&self, command: &str, timeout: Duration) -> ExecutionResult {
        self.executor.execute(command, timeout)
    }
}

/// Converts an execution result into reply text or a handler error.
pub(crate) fn outcome(
    command: &str,
    timeout: Duration,
    result: ExecutionResult,
) -> Result<String, CommandError> {
    if result.timed_out {
        return Err(if result.output.is_empty() {
            CommandError::timeout(timeout)
        } else {
            CommandError::timeout_with_output(timeout, result.output)
        });
    }
    if result.session_unavailable {
        let detail = result
            .error_detail
            .unwrap_or_else(|| "no debugging session".to_owned());
        return Err(CommandError::session_unavailable(detail));
    }
    if result.failed {
        let detail = result
            .error_detail
            .filter(|detail| !detail.trim().is_empty())
            .unwrap_or_else(|| result.output.trim().to_owned());
        let category = classify(&detail);
        return Err(CommandError::execution(detail, category)
            .with_suggestion(suggestion_for(category, command)));
    }
    Ok(result.output)
}

/// Caps `output` at [`MAX_OUTPUT_BYTES`], appending `note` when cut.
pub(crate) fn truncate_output(mut output: String, note: &str) -> String {
    if output.len() <= MAX_OUTPUT_BYTES {
        return output;
    }
    let mut cut = MAX_OUTPUT_BYTES;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str("\n... [");
    output.push_str(note);
    output.push(']');
    output
}

/// Registers every built-in command on `server`.
///
/// # Errors
///
/// Fails if a name is already taken or the server has started.
pub fn register_builtin(server: &Server, context: &Arc<CommandContext>) -> Result<(), ServerError> {
    server.register_handler("check_connection", basic::check_connection)?;
    server.register_handler("version", basic::version)?;
    register(server, context, "lm", basic::list_modules)?;
    register(server, context, "dt", basic::display_type)?;
    register(server, context, "dd", basic::display_memory)?;
    register(server, context, "get_metadata", basic::metadata)?;
    register(server, context, "execute_command", execute::execute_command)?;
    register(
        server,
        context,
        "execute_command_enhanced",
        extended::execute_command_enhanced,
    )?;
    register(
        server,
        context,
        "execute_command_streaming",
        extended::execute_command_streaming,
    )?;
    register(server, context, "for_each_module", extended::for_each_module)?;
    register(server, context, "health_check", diagnostics::health_check)?;
    register(server, context, "performance_metrics", diagnostics::performance_metrics)?;
    Ok(())
}

fn register(
    server: &Server,
    context: &Arc<CommandContext>,
    name: &str,
    handler: fn(&CommandContext, &Request) -> Result<Reply, CommandError>,
) -> Result<(), ServerError> {
    let context = Arc::clone(context);
    server.register_handler(name, move |request: &Request| handler(&context, request))
}
