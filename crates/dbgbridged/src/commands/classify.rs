//! Maps debugger failure text onto [`ErrorCategory`].

use crate::protocol::ErrorCategory;

/// Patterns checked in order; the first category with a match wins.
const PATTERNS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::CommandSyntax,
        &[
            "syntax error",
            "invalid command",
            "unknown command",
            "undefined command",
            "ambiguous command",
        ],
    ),
    (
        ErrorCategory::PermissionDenied,
        &["access denied", "permission denied", "operation not permitted"],
    ),
    (
        ErrorCategory::MemoryAccess,
        &[
            "cannot access memory",
            "access violation",
            "invalid address",
            "memory read failed",
        ],
    ),
    (
        ErrorCategory::ResourceExhaustion,
        &["out of memory", "memory allocation", "resource temporarily unavailable"],
    ),
    (
        ErrorCategory::SymbolOrTargetResolution,
        &[
            "no symbol",
            "symbol not found",
            "could not resolve",
            "couldn't resolve",
            "unable to resolve",
            "no such file",
        ],
    ),
    (
        ErrorCategory::ConnectionLost,
        &["connection", "disconnect", "rpc", "session unavailable", "debugger exited"],
    ),
    (ErrorCategory::Timeout, &["timeout", "timed out"]),
    (
        ErrorCategory::ExecutionContext,
        &["not being run", "no frame", "no stack", "process", "thread", "context"],
    ),
];

/// Classifies a failure message, case-insensitively.
#[must_use]
pub fn classify(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    PATTERNS
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| lower.contains(needle)))
        .map_or(ErrorCategory::Unknown, |(category, _)| *category)
}

/// Suggestion for a failure of `category` raised by `command`.
#[must_use]
pub fn suggestion_for(category: ErrorCategory, command: &str) -> String {
    match category {
        ErrorCategory::CommandSyntax => {
            let verb = command.split_whitespace().next().unwrap_or(command);
            format!("Check the command syntax; run 'help {verb}' in the debugger for usage.")
        }
        other => other.suggestion().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("Undefined command: \"frobnicate\".  Try \"help\".", ErrorCategory::CommandSyntax)]
    #[case("ptrace: Operation not permitted.", ErrorCategory::PermissionDenied)]
    #[case("Cannot access memory at address 0x0", ErrorCategory::MemoryAccess)]
    #[case("No symbol \"missing\" in current context.", ErrorCategory::SymbolOrTargetResolution)]
    #[case("Out of memory allocating 4096 bytes", ErrorCategory::ResourceExhaustion)]
    #[case("debugger exited before the command completed", ErrorCategory::ConnectionLost)]
    #[case("operation timed out", ErrorCategory::Timeout)]
    #[case("The program is not being run.", ErrorCategory::ExecutionContext)]
    #[case("something odd happened", ErrorCategory::Unknown)]
    fn classifies_debugger_messages(#[case] message: &str, #[case] expected: ErrorCategory) {
        assert_eq!(classify(message), expected);
    }

    #[test]
    fn syntax_suggestion_names_the_verb() {
        let text = suggestion_for(ErrorCategory::CommandSyntax, "frobnicate now");
        assert!(text.contains("help frobnicate"), "{text}");
    }

    #[test]
    fn other_suggestions_use_category_defaults() {
        assert_eq!(
            suggestion_for(ErrorCategory::Timeout, "bt"),
            ErrorCategory::Timeout.suggestion()
        );
    }
}
