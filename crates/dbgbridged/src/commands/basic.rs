//! Connection checks, version and thin wrappers over common debugger commands.

use std::time::Duration;

use crate::dispatch::CommandError;
use crate::protocol::{Reply, Request};

use super::args::{DisplayTypeArgs, DumpMemoryArgs, timeout_or};
use super::{CommandContext, truncate_output};

pub(crate) const CONNECTION_VERIFIED: &str = "Connection verified successfully";

pub(crate) const VERSION: &str = concat!("dbgbridged v", env!("CARGO_PKG_VERSION"));

/// Default budget for `get_metadata`, which runs two commands.
const METADATA_TIMEOUT: Duration = Duration::from_secs(15);

pub(crate) fn check_connection(_request: &Request) -> Result<Reply, CommandError> {
    Ok(Reply::output(CONNECTION_VERIFIED))
}

pub(crate) fn version(_request: &Request) -> Result<Reply, CommandError> {
    Ok(Reply::output(VERSION))
}

pub(crate) fn list_modules(context: &CommandContext, request: &Request) -> Result<Reply, CommandError> {
    let timeout = timeout_or(request, context.default_timeout())?;
    let output = context.run("lm", timeout)?;
    Ok(Reply::output(truncate_output(
        output,
        "Output truncated due to size limit - use more specific lm options for a full listing",
    )))
}

pub(crate) fn display_type(context: &CommandContext, request: &Request) -> Result<Reply, CommandError> {
    let args = DisplayTypeArgs::parse(request, context.default_timeout())?;
    let output = context.run(&args.command(), args.timeout)?;
    Ok(Reply::output(output))
}

pub(crate) fn display_memory(
    context: &CommandContext,
    request: &Request,
) -> Result<Reply, CommandError> {
    let args = DumpMemoryArgs::parse(request, context.default_timeout())?;
    let output = context.run(&args.command(), args.timeout)?;
    Ok(Reply::output(output))
}

/// Target description followed by the module list.
pub(crate) fn metadata(context: &CommandContext, request: &Request) -> Result<Reply, CommandError> {
    let timeout = timeout_or(request, METADATA_TIMEOUT)?;
    let note = "Output truncated due to size limit";
    let target = truncate_output(context.run("!target", timeout)?, note);
    let modules = truncate_output(context.run("lm", timeout)?, note);
    Ok(Reply::output(format!(
        "Target Information:\n{target}\n\nModules:\n{modules}"
    )))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::{fixture, rstest};
    use serde_json::{Map, Value, json};

    use super::*;
    use crate::commands::MAX_OUTPUT_BYTES;
    use crate::commands::test_support::context;
    use crate::engine::test_doubles::{Behaviour, ScriptedEngine};

    fn request(value: Value) -> Request {
        let args: Map<String, Value> = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Request::command(9, "test", args)
    }

    #[fixture]
    fn engine() -> Arc<ScriptedEngine> {
        Arc::new(
            ScriptedEngine::new()
                .script("!target", Behaviour::Reply("live process 4242".to_owned()))
                .script("lm", Behaviour::Reply("libc.so.6\nld-linux.so.2".to_owned()))
                .script("dd bad", Behaviour::Fail("Cannot access memory at address 0xbad".to_owned())),
        )
    }

    #[test]
    fn connection_check_is_static() {
        let reply = check_connection(&request(json!({}))).expect("reply");
        assert_eq!(reply.text(), Some(CONNECTION_VERIFIED));
    }

    #[test]
    fn version_names_the_daemon() {
        let reply = version(&request(json!({}))).expect("reply");
        assert!(reply.text().is_some_and(|text| text.starts_with("dbgbridged v")));
    }

    #[rstest]
    fn display_type_forwards_the_command(engine: Arc<ScriptedEngine>) {
        let context = context(&engine);
        let reply = display_type(&context, &request(json!({"type_name": "struct list"})))
            .expect("reply");
        assert_eq!(reply.text(), Some("dt struct list"));
    }

    #[rstest]
    fn display_memory_classifies_failures(engine: Arc<ScriptedEngine>) {
        let context = context(&engine);
        let error = display_memory(&context, &request(json!({"address": "bad", "length": 4})))
            .expect_err("failure");
        assert_eq!(error.category(), crate::protocol::ErrorCategory::MemoryAccess);
    }

    #[rstest]
    fn metadata_combines_target_and_modules(engine: Arc<ScriptedEngine>) {
        let context = context(&engine);
        let reply = metadata(&context, &request(json!({"timeout_ms": 2000}))).expect("reply");
        assert_eq!(
            reply.text(),
            Some("Target Information:\nlive process 4242\n\nModules:\nlibc.so.6\nld-linux.so.2")
        );
    }

    #[test]
    fn module_listing_is_capped() {
        let engine = Arc::new(
            ScriptedEngine::new().script("lm", Behaviour::Reply("m".repeat(MAX_OUTPUT_BYTES + 10))),
        );
        let context = context(&engine);
        let reply = list_modules(&context, &request(json!({}))).expect("reply");
        let text = reply.text().expect("output");
        assert!(text.ends_with("for a full listing]"));
        assert!(text.len() < MAX_OUTPUT_BYTES + 200);
    }
}
