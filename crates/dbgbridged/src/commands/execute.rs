//! `execute_command`: runs arbitrary debugger text under a timeout.

use std::time::Duration;

use serde_json::{Value, json};

use crate::dispatch::CommandError;
use crate::executor::is_effectively_empty;
use crate::protocol::{ErrorCategory, Reply, Request};
use crate::session::timestamp;

use super::args::ExecuteArgs;
use super::timeouts::{TimeoutCategory, effective_timeout};
use super::{CommandContext, outcome};

/// Timeout applied when the request does not name one.
pub(crate) const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);

const NO_OUTPUT: &str = "Command returned no output. The command might be invalid or unsupported.";

const BREAKPOINT_SET: &[&str] = &["bp", "ba", "bu", "bm", "break", "tbreak", "watch"];
const RESUME: &[&str] = &["g", "gh", "gn", "c", "continue"];
const STEP: &[&str] = &[
    "p", "t", "gu", "pa", "pc", "tc", "step", "next", "stepi", "nexti", "si", "ni", "finish",
];
const BREAKPOINT_CLEAR: &[&str] = &["bc", "delete"];
const BREAKPOINT_DISABLE: &[&str] = &["bd", "disable"];
const BREAKPOINT_ENABLE: &[&str] = &["be", "enable"];
const MEMORY_EDIT: &[&str] = &["eb", "ed", "eq", "ew", "ea", "eu"];
const RESTART: &[&str] = &[".restart", ".reboot"];

pub(crate) fn execute_command(
    context: &CommandContext,
    request: &Request,
) -> Result<Reply, CommandError> {
    let args = ExecuteArgs::parse(request, DEFAULT_EXECUTE_TIMEOUT)?;
    let category = TimeoutCategory::of(&args.command);
    let timeout = effective_timeout(&args.command, args.timeout);

    let result = context.execute(&args.command, timeout);
    let elapsed = result.elapsed;
    let captured = outcome(&args.command, timeout, result)?;

    let output = if is_effectively_empty(&captured) {
        confirmation_for(&args.command)
            .ok_or_else(|| {
                CommandError::execution(NO_OUTPUT, ErrorCategory::Unknown)
                    .with_suggestion("Check that the command is valid in the current context.")
            })?
            .to_owned()
    } else {
        captured
    };

    Ok(Reply::output(output).with_field("metadata", metadata(elapsed, timeout, category)))
}

/// `metadata` object attached to replies of the execute family.
pub(crate) fn metadata(elapsed: Duration, timeout: Duration, category: TimeoutCategory) -> Value {
    json!({
        "execution_time": elapsed.as_secs_f64(),
        "timeout_ms": u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        "timeout_category": category.as_ref(),
        "timestamp": timestamp(),
    })
}

/// Confirmation text for commands that succeed silently.
///
/// Returns `None` when silence means the command did nothing.
pub(crate) fn confirmation_for(command: &str) -> Option<&'static str> {
    let lower = command.trim().to_ascii_lowercase();
    let mut words = lower.split_whitespace();
    let verb = words.next()?;
    let has_operand = words.next().is_some();

    if BREAKPOINT_SET.contains(&verb) && has_operand {
        Some("Breakpoint set successfully.")
    } else if RESUME.contains(&verb) {
        Some("Execution continued.")
    } else if STEP.contains(&verb) {
        Some("Command completed successfully.")
    } else if BREAKPOINT_CLEAR.contains(&verb) {
        Some("Breakpoint cleared successfully.")
    } else if BREAKPOINT_DISABLE.contains(&verb) && has_operand {
        Some("Breakpoint disabled successfully.")
    } else if BREAKPOINT_ENABLE.contains(&verb) && has_operand {
        Some("Breakpoint enabled successfully.")
    } else if MEMORY_EDIT.contains(&verb) && has_operand {
        Some("Memory edit command completed successfully.")
    } else if lower.starts_with("set var ") {
        Some("Memory edit command completed successfully.")
    } else if RESTART.contains(&verb) {
        Some("Command completed successfully.")
    } else {
        None
    }
}
