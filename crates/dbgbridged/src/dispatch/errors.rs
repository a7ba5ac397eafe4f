//! Errors reported by command handlers.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::{ErrorCategory, ErrorCode, Failure};

/// Failure returned by a [`CommandHandler`](super::CommandHandler).
///
/// Each variant maps onto an [`ErrorCode`] and an [`ErrorCategory`] so the
/// dispatcher can build the wire response without inspecting messages.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required arguments were missing or had the wrong shape.
    #[error("invalid arguments: {message}")]
    InvalidArguments {
        /// What was wrong with the arguments.
        message: String,
    },

    /// The native call ran and reported a failure.
    #[error("{message}")]
    Execution {
        /// Debugger error text.
        message: String,
        /// Classification of `message`.
        category: ErrorCategory,
        /// Hint replacing the category default.
        suggestion: Option<String>,
    },

    /// The native call did not complete in time.
    #[error("command timed out after {} ms", .timeout.as_millis())]
    Timeout {
        /// Deadline that expired.
        timeout: Duration,
        /// Output salvaged from an interrupted call.
        partial_output: Option<String>,
    },

    /// No debugging session could run the call.
    #[error("debugging session unavailable: {message}")]
    SessionUnavailable {
        /// Why no session could run the call.
        message: String,
    },
}

impl CommandError {
    /// Creates an invalid arguments error.
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }

    /// Creates an execution error with an explicit category.
    pub fn execution(message: impl Into<String>, category: ErrorCategory) -> Self {
        Self::Execution {
            message: message.into(),
            category,
            suggestion: None,
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub const fn timeout(timeout: Duration) -> Self {
        Self::Timeout {
            timeout,
            partial_output: None,
        }
    }

    /// Creates a timeout error carrying what the call printed before it was
    /// interrupted.
    pub fn timeout_with_output(timeout: Duration, partial_output: impl Into<String>) -> Self {
        Self::Timeout {
            timeout,
            partial_output: Some(partial_output.into()),
        }
    }

    /// Overrides the category suggestion of an execution error.
    ///
    /// Other variants are returned unchanged.
    #[must_use]
    pub fn with_suggestion(self, text: impl Into<String>) -> Self {
        match self {
            Self::Execution {
                message, category, ..
            } => Self::Execution {
                message,
                category,
                suggestion: Some(text.into()),
            },
            other => other,
        }
    }

    /// Creates a session unavailable error.
    pub fn session_unavailable(message: impl Into<String>) -> Self {
        Self::SessionUnavailable {
            message: message.into(),
        }
    }

    /// Wire code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArguments { .. } => ErrorCode::InvalidArguments,
            Self::Execution { .. } => ErrorCode::ExecutionFailed,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::SessionUnavailable { .. } => ErrorCode::SessionUnavailable,
        }
    }

    /// Failure category for this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArguments { .. } => ErrorCategory::CommandSyntax,
            Self::Execution { category, .. } => *category,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::SessionUnavailable { .. } => ErrorCategory::ConnectionLost,
        }
    }

    /// Converts the error into its wire payload.
    #[must_use]
    pub fn to_failure(&self) -> Failure {
        let failure = Failure::new(self.code(), self.category(), self.to_string());
        match self {
            Self::Execution {
                suggestion: Some(suggestion),
                ..
            } => failure.with_suggestion(suggestion.clone()),
            Self::Timeout {
                timeout,
                partial_output,
            } => {
                let timed_out = failure.with_field(
                    "timeout_ms",
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                );
                match partial_output {
                    Some(partial) => timed_out.with_field("partial_output", partial.clone()),
                    None => timed_out,
                }
            }
            _ => failure,
        }
    }
}
