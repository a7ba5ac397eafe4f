//! Shared configuration for the dbgbridge daemon.
//!
//! Values are layered with `ortho_config`: built-in defaults, then a
//! configuration file, then `DBGBRIDGE_*` environment variables, then command
//! line flags. The resolved [`Config`] names the channel the daemon listens on,
//! the logging setup, the command timeout budget, and the debugger process
//! that backs the native session.

mod channel;
mod defaults;
mod logging;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_GRACE_PERIOD_MS, DEFAULT_LOG_FILTER, DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_MS,
    default_channel, default_grace_period_ms, default_log_filter, default_log_filter_string,
    default_log_format, default_timeout_ms,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use channel::{ChannelEndpoint, ChannelParseError, ChannelPreparationError};

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "DBGBRIDGE")]
pub struct Config {
    /// Channel the daemon listens on.
    #[serde(default = "default_channel")]
    pub channel: ChannelEndpoint,
    /// `tracing` filter expression.
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Timeout applied when a request does not carry its own.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Wait after an interrupt request before a worker is abandoned.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Debugger program hosting the native session. Empty means none.
    #[serde(default)]
    pub engine_program: String,
    /// Whitespace separated arguments for [`Config::engine_program`].
    #[serde(default)]
    pub engine_args: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            engine_program: String::new(),
            engine_args: String::new(),
        }
    }
}

impl Config {
    /// Channel endpoint the daemon binds.
    #[must_use]
    pub fn channel(&self) -> &ChannelEndpoint {
        &self.channel
    }

    /// Filter expression handed to the tracing subscriber.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Configured log format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Timeout for requests that do not specify one.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Grace period granted to an interrupted native call.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Debugger program and its arguments, when one is configured.
    #[must_use]
    pub fn engine_command(&self) -> Option<EngineCommand> {
        let program = self.engine_program.trim();
        if program.is_empty() {
            return None;
        }
        Some(EngineCommand {
            program: program.to_owned(),
            args: self
                .engine_args
                .split_whitespace()
                .map(str::to_owned)
                .collect(),
        })
    }
}

/// Debugger process invocation derived from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    /// Executable to launch.
    pub program: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
}
