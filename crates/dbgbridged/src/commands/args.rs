//! Typed arguments for the built-in commands.
//!
//! Each struct reads its fields from the request's argument bag. Missing
//! optional fields fall back to defaults; present fields of the wrong type are
//! rejected rather than ignored.

use std::time::Duration;

use serde_json::Value;

use crate::dispatch::CommandError;
use crate::protocol::Request;

/// Default `length` for `dd`.
pub(crate) const DEFAULT_DUMP_LENGTH: u64 = 32;

/// Arguments of `execute_command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExecuteArgs {
    pub(crate) command: String,
    pub(crate) timeout: Duration,
}

impl ExecuteArgs {
    /// Parses `command` (required) and `timeout_ms` (defaults to `fallback`).
    pub(crate) fn parse(request: &Request, fallback: Duration) -> Result<Self, CommandError> {
        let command = required_str(request, "command")?.to_owned();
        let timeout = timeout_or(request, fallback)?;
        Ok(Self { command, timeout })
    }
}

/// Arguments of `dt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DisplayTypeArgs {
    pub(crate) type_name: String,
    pub(crate) address: Option<String>,
    pub(crate) timeout: Duration,
}

impl DisplayTypeArgs {
    pub(crate) fn parse(request: &Request, fallback: Duration) -> Result<Self, CommandError> {
        Ok(Self {
            type_name: required_str(request, "type_name")?.to_owned(),
            address: optional_str(request, "address")?.map(str::to_owned),
            timeout: timeout_or(request, fallback)?,
        })
    }

    /// Native command text.
    pub(crate) fn command(&self) -> String {
        match &self.address {
            Some(address) => format!("dt {} {address}", self.type_name),
            None => format!("dt {}", self.type_name),
        }
    }
}

/// Arguments of `dd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DumpMemoryArgs {
    pub(crate) address: String,
    pub(crate) length: u64,
    pub(crate) timeout: Duration,
}

impl DumpMemoryArgs {
    pub(crate) fn parse(request: &Request, fallback: Duration) -> Result<Self, CommandError> {
        let length = optional_u64(request, "length")?.unwrap_or(DEFAULT_DUMP_LENGTH);
        if length == 0 {
            return Err(CommandError::invalid_arguments("length must be positive"));
        }
        Ok(Self {
            address: required_str(request, "address")?.to_owned(),
            length,
            timeout: timeout_or(request, fallback)?,
        })
    }

    pub(crate) fn command(&self) -> String {
        format!("dd {} {}", self.address, self.length)
    }
}

/// Reads the optional `timeout_ms` argument.
pub(crate) fn timeout_or(request: &Request, fallback: Duration) -> Result<Duration, CommandError> {
    match optional_u64(request, "timeout_ms")? {
        Some(0) => Err(CommandError::invalid_arguments("timeout_ms must be positive")),
        Some(millis) => Ok(Duration::from_millis(millis)),
        None => Ok(fallback),
    }
}

/// Reads an optional boolean argument.
pub(crate) fn flag_or(request: &Request, key: &str, fallback: bool) -> Result<bool, CommandError> {
    match request.args().get(key) {
        None | Some(Value::Null) => Ok(fallback),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(_) => Err(CommandError::invalid_arguments(format!(
            "{key} must be a boolean"
        ))),
    }
}

fn required_str<'a>(request: &'a Request, key: &str) -> Result<&'a str, CommandError> {
    optional_str(request, key)?
        .ok_or_else(|| CommandError::invalid_arguments(format!("{key} is required")))
}

/// A blank string counts as absent.
fn optional_str<'a>(request: &'a Request, key: &str) -> Result<Option<&'a str>, CommandError> {
    match request.args().get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.trim())),
        Some(_) => Err(CommandError::invalid_arguments(format!(
            "{key} must be a string"
        ))),
    }
}

fn optional_u64(request: &Request, key: &str) -> Result<Option<u64>, CommandError> {
    match request.args().get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            CommandError::invalid_arguments(format!("{key} must be a non-negative integer"))
        }),
    }
}
