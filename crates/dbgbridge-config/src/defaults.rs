use crate::channel::ChannelEndpoint;

/// Default TCP port used when Unix domain sockets are not available.
pub const DEFAULT_TCP_PORT: u16 = 9780;

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default wall-clock budget for a single native command.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Extra wait after an interrupt request before a worker is abandoned.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 500;

/// Default log filter expression used by the daemon.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the daemon.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Default command timeout in milliseconds.
pub const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Default interrupt grace period in milliseconds.
pub const fn default_grace_period_ms() -> u64 {
    DEFAULT_GRACE_PERIOD_MS
}

/// Computes the default channel endpoint for the daemon.
pub fn default_channel() -> ChannelEndpoint {
    ChannelEndpoint::for_current_user()
}
