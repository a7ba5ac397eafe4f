//! Variants of `execute_command`: optional metadata, streaming hints and
//! per-module fan-out.
//!
//! All three run through the shared executor with the same timeout floors as
//! `execute_command`. Unlike it they return silent output as-is.

use std::time::Duration;

use serde_json::json;

use crate::dispatch::CommandError;
use crate::protocol::{Reply, Request};

use super::CommandContext;
use super::args::{ExecuteArgs, flag_or};
use super::execute::{DEFAULT_EXECUTE_TIMEOUT, metadata};
use super::timeouts::{TimeoutCategory, effective_timeout};

/// Default budget for streaming and per-module commands.
pub(crate) const DEFAULT_LONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Output larger than this is flagged for chunked delivery.
pub(crate) const STREAMING_THRESHOLD_BYTES: usize = 50_000;

/// Chunk size assumed by streaming clients.
pub(crate) const STREAM_CHUNK_BYTES: usize = 4096;

/// Runs `command`, omitting the metadata block when `include_metadata` is
/// `false`.
pub(crate) fn execute_command_enhanced(
    context: &CommandContext,
    request: &Request,
) -> Result<Reply, CommandError> {
    let args = ExecuteArgs::parse(request, DEFAULT_EXECUTE_TIMEOUT)?;
    let include_metadata = flag_or(request, "include_metadata", true)?;
    let (output, details) = run_with_metadata(context, &args.command, args.timeout)?;
    let reply = Reply::output(output);
    Ok(if include_metadata {
        reply.with_field("metadata", details)
    } else {
        reply
    })
}

/// Runs `command` and describes how a client should chunk the output.
pub(crate) fn execute_command_streaming(
    context: &CommandContext,
    request: &Request,
) -> Result<Reply, CommandError> {
    let args = ExecuteArgs::parse(request, DEFAULT_LONG_TIMEOUT)?;
    let (output, details) = run_with_metadata(context, &args.command, args.timeout)?;
    let streaming = streaming_hint(output.len());
    Ok(Reply::output(output)
        .with_field("metadata", details)
        .with_field("streaming", streaming))
}

/// Runs `command` once per loaded module via `!for_each_module`.
pub(crate) fn for_each_module(
    context: &CommandContext,
    request: &Request,
) -> Result<Reply, CommandError> {
    let args = ExecuteArgs::parse(request, DEFAULT_LONG_TIMEOUT)?;
    let command = format!("!for_each_module {}", args.command);
    let (output, details) = run_with_metadata(context, &command, args.timeout)?;
    Ok(Reply::output(output)
        .with_field("metadata", details)
        .with_field("native_command", command))
}

fn run_with_metadata(
    context: &CommandContext,
    command: &str,
    requested: Duration,
) -> Result<(String, serde_json::Value), CommandError> {
    let timeout = effective_timeout(command, requested);
    let result = context.execute(command, timeout);
    let elapsed = result.elapsed;
    let output = super::outcome(command, timeout, result)?;
    Ok((output, metadata(elapsed, timeout, TimeoutCategory::of(command))))
}

fn streaming_hint(output_size: usize) -> serde_json::Value {
    let enabled = output_size > STREAMING_THRESHOLD_BYTES;
    let chunk_count = if enabled {
        output_size.div_ceil(STREAM_CHUNK_BYTES)
    } else {
        1
    };
    json!({
        "enabled": enabled,
        "output_size": output_size,
        "chunk_count": chunk_count,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::{fixture, rstest};
    use serde_json::{Map, Value};

    use super::*;
    use crate::commands::test_support::context;
    use crate::engine::test_doubles::{Behaviour, ScriptedEngine};
    use crate::protocol::ErrorCategory;

    fn request(command: &str, value: Value) -> Request {
        let args: Map<String, Value> = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Request::command(31, command, args)
    }

    #[fixture]
    fn engine() -> Arc<ScriptedEngine> {
        Arc::new(
            ScriptedEngine::new()
                .script("!for_each_module", Behaviour::Echo)
                .script("big", Behaviour::Reply("y".repeat(60_000)))
                .script("quiet", Behaviour::Reply(String::new()))
                .script("frob", Behaviour::Fail("Undefined command: \"frob\".".to_owned())),
        )
    }

    #[rstest]
    fn enhanced_includes_metadata_by_default(engine: Arc<ScriptedEngine>) {
        let context = context(&engine);
        let reply = execute_command_enhanced(
            &context,
            &request("execute_command_enhanced", json!({"command": "info frame"})),
        )
        .expect("reply");
        assert_eq!(reply.text(), Some("info frame"));
        let details = reply.field("metadata").expect("metadata");
        assert_eq!(details["timeout_category"], "quick");
        assert_eq!(details["timeout_ms"], 30_000);
    }

    #[rstest]
    fn enhanced_can_omit_metadata(engine: Arc<ScriptedEngine>) {
        let context = context(&engine);
        let reply = execute_command_enhanced(
            &context,
            &request(
                "execute_command_enhanced",
                json!({"command": "info frame", "include_metadata": false}),
            ),
        )
        .expect("reply");
        assert_eq!(reply.text(), Some("info frame"));
        assert!(reply.field("metadata").is_none());
    }

    #[rstest]
    fn enhanced_returns_silent_output_unchanged(engine: Arc<ScriptedEngine>) {
        let context = context(&engine);
        let reply = execute_command_enhanced(
            &context,
            &request("execute_command_enhanced", json!({"command": "quiet"})),
        )
        .expect("silence is not an error here");
        assert_eq!(reply.text(), Some(""));
    }

    #[rstest]
    fn enhanced_classifies_failures(engine: Arc<ScriptedEngine>) {
        let context = context(&engine);
        let error = execute_command_enhanced(
            &context,
            &request("execute_command_enhanced", json!({"command": "frob"})),
        )
        .expect_err("failure");
        assert_eq!(error.category(), ErrorCategory::CommandSyntax);
    }

    #[rstest]
    fn streaming_flags_large_output(engine: Arc<ScriptedEngine>) {
        let context = context(&engine);
        let reply = execute_command_streaming(
            &context,
            &request("execute_command_streaming", json!({"command": "big"})),
        )
        .expect("reply");
        assert_eq!(
            reply.field("streaming"),
            Some(&json!({"enabled": true, "output_size": 60_000, "chunk_count": 15}))
        );
        assert_eq!(reply.field("metadata").expect("metadata")["timeout_ms"], 60_000);
    }

    #[rstest]
    fn streaming_keeps_small_output_in_one_chunk(engine: Arc<ScriptedEngine>) {
        let context = context(&engine);
        let reply = execute_command_streaming(
            &context,
            &request("execute_command_streaming", json!({"command": "bt"})),
        )
        .expect("reply");
        assert_eq!(
            reply.field("streaming"),
            Some(&json!({"enabled": false, "output_size": 2, "chunk_count": 1}))
        );
    }

    #[rstest]
    #[case(50_000, false, 1)]
    #[case(50_001, true, 13)]
    #[case(53_248, true, 13)]
    fn chunk_counts_round_up(#[case] size: usize, #[case] enabled: bool, #[case] chunks: usize) {
        let hint = streaming_hint(size);
        assert_eq!(hint["enabled"], enabled);
        assert_eq!(hint["chunk_count"], chunks);
    }

    #[rstest]
    fn for_each_module_wraps_the_command(engine: Arc<ScriptedEngine>) {
        let context = context(&engine);
        let reply = for_each_module(
            &context,
            &request("for_each_module", json!({"command": "!chkimg @#ModuleName"})),
        )
        .expect("reply");
        assert_eq!(reply.text(), Some("!for_each_module !chkimg @#ModuleName"));
        assert_eq!(
            reply.field("native_command"),
            Some(&json!("!for_each_module !chkimg @#ModuleName"))
        );
        let details = reply.field("metadata").expect("metadata");
        assert_eq!(details["timeout_category"], "bulk");
        assert_eq!(details["timeout_ms"], 300_000);
    }

    #[rstest]
    fn for_each_module_requires_a_command(engine: Arc<ScriptedEngine>) {
        let context = context(&engine);
        let error = for_each_module(&context, &request("for_each_module", json!({})))
            .expect_err("missing command");
        assert!(matches!(error, CommandError::InvalidArguments { .. }));
    }
}
