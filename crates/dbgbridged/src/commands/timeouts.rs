//! Timeout floors by command cost.

use std::time::Duration;

use strum::{AsRefStr, Display};

/// Rough cost class of a native command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum TimeoutCategory {
    /// Register, stack and memory reads.
    Quick,
    /// Anything not listed elsewhere.
    Normal,
    /// Symbol loading and module walks.
    Slow,
    /// Crash and heap analysis.
    Analysis,
    /// Commands repeated over many targets.
    Bulk,
}

const QUICK: &[&str] = &[
    "version", "r", "k", "kb", "kn", "kp", "u", "db", "dd", "dw", "dq", "bt", "backtrace", "x",
    "p", "print", "info",
];
const ANALYSIS: &[&str] = &["!analyze", "!pool", "!heap", "!handle"];
const BULK: &[&str] = &["!for_each_module", "lm"];
const SLOW: &[&str] = &["!process", "!thread", "!dlls", "!address"];

impl TimeoutCategory {
    /// Classifies `command` by its first word.
    #[must_use]
    pub fn of(command: &str) -> Self {
        let normalised = command.trim().to_ascii_lowercase();
        let first = normalised.split_whitespace().next().unwrap_or_default();
        if QUICK.contains(&first) {
            Self::Quick
        } else if ANALYSIS.contains(&first) {
            Self::Analysis
        } else if BULK.contains(&first) || normalised.starts_with("!process 0 0") {
            Self::Bulk
        } else if SLOW.contains(&first) {
            Self::Slow
        } else {
            Self::Normal
        }
    }

    /// Minimum timeout granted to commands of this class.
    #[must_use]
    pub const fn floor(self) -> Duration {
        match self {
            Self::Quick => Duration::from_secs(5),
            Self::Normal => Duration::from_secs(15),
            Self::Slow => Duration::from_secs(30),
            Self::Analysis => Duration::from_secs(60),
            Self::Bulk => Duration::from_secs(300),
        }
    }
}

/// Raises `requested` to the floor of the command's category.
#[must_use]
pub fn effective_timeout(command: &str, requested: Duration) -> Duration {
    requested.max(TimeoutCategory::of(command).floor())
}
