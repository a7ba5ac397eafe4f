//! Operator commands read from the daemon's console.

use std::io::BufRead;
use std::str::FromStr;
use std::sync::mpsc::Sender;

use strum::{AsRefStr, Display, EnumString};
use tracing::{debug, warn};

const CONSOLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::console");

/// Lifecycle command typed by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OperatorCommand {
    /// Start serving if stopped.
    Start,
    /// Stop serving but keep the daemon alive.
    Stop,
    /// Print whether the server is running.
    Status,
    /// Stop serving and exit.
    #[strum(serialize = "quit", serialize = "exit")]
    Quit,
}

impl OperatorCommand {
    /// Parses one console line; blank lines yield `None`.
    ///
    /// # Errors
    ///
    /// Returns the trimmed line when it names no command.
    pub fn parse_line(line: &str) -> Result<Option<Self>, String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        Self::from_str(trimmed)
            .map(Some)
            .map_err(|_| trimmed.to_owned())
    }
}

/// Forwards commands read from `input` until it closes or `sink` hangs up.
pub(crate) fn forward_commands<R, E>(input: R, sink: &Sender<E>)
where
    R: BufRead,
    E: From<OperatorCommand>,
{
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(error) => {
                warn!(target: CONSOLE_TARGET, %error, "operator console read failed");
                break;
            }
        };
        match OperatorCommand::parse_line(&line) {
            Ok(Some(command)) => {
                if sink.send(E::from(command)).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(unknown) => {
                warn!(target: CONSOLE_TARGET, command = %unknown, "unknown operator command; expected start, stop, status or quit");
            }
        }
    }
    debug!(target: CONSOLE_TARGET, "operator console closed");
}
