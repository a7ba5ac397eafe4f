//! Turns inbound frames into responses.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::protocol::{ErrorCategory, ErrorCode, Failure, Request, Response};

use super::{CommandRegistry, DISPATCH_TARGET};

/// Routes parsed requests to registered handlers.
#[derive(Debug, Clone)]
pub(crate) struct Dispatcher {
    registry: Arc<CommandRegistry>,
}

impl Dispatcher {
    pub(crate) const fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    /// Produces the single response owed for `frame`.
    pub(crate) fn dispatch_frame(&self, frame: &[u8]) -> Response {
        match Request::parse(frame) {
            Ok(request) => self.dispatch(&request),
            Err(error) => {
                warn!(target: DISPATCH_TARGET, %error, "malformed message");
                Response::protocol_error(
                    None,
                    None,
                    Failure::new(
                        ErrorCode::InvalidMessage,
                        ErrorCategory::CommandSyntax,
                        format!("error processing message: {error}"),
                    )
                    .with_suggestion("Send one JSON object per line."),
                )
            }
        }
    }

    /// Dispatches a parsed request.
    ///
    /// The response always carries the request's `id` and `command`.
    pub(crate) fn dispatch(&self, request: &Request) -> Response {
        let id = request.id();
        let name = request.name();

        if !request.is_command() {
            warn!(target: DISPATCH_TARGET, id, kind = request.kind(), "unsupported message type");
            return Response::failure(
                id,
                name,
                Failure::new(
                    ErrorCode::InvalidMessageType,
                    ErrorCategory::CommandSyntax,
                    "only command messages are supported",
                )
                .with_suggestion("Set \"type\" to \"command\"."),
            );
        }

        let Some(handler) = self.registry.lookup(name) else {
            warn!(target: DISPATCH_TARGET, id, command = name, "unknown command");
            return Response::failure(
                id,
                name,
                Failure::new(
                    ErrorCode::InvalidCommand,
                    ErrorCategory::CommandSyntax,
                    format!("unknown command: {name}"),
                )
                .with_suggestion(format!(
                    "Registered commands: {}.",
                    self.registry.names().join(", ")
                )),
            );
        };

        debug!(target: DISPATCH_TARGET, id, command = name, "dispatching command");
        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request))) {
            Ok(Ok(reply)) => Response::success(id, name, reply),
            Ok(Err(error)) => {
                debug!(
                    target: DISPATCH_TARGET,
                    id,
                    command = name,
                    code = %error.code(),
                    %error,
                    "command reported failure"
                );
                Response::failure(id, name, error.to_failure())
            }
            Err(payload) => {
                let detail = panic_message(payload.as_ref());
                warn!(target: DISPATCH_TARGET, id, command = name, panic = %detail, "command handler panicked");
                Response::failure(
                    id,
                    name,
                    Failure::new(
                        ErrorCode::CommandFailed,
                        ErrorCategory::InternalError,
                        format!("command execution failed: {detail}"),
                    ),
                )
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "handler panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use serde_json::{Value, json};

    use super::*;
    use crate::dispatch::{CommandError, CommandHandler};
    use crate::protocol::Reply;

    fn register(registry: &CommandRegistry, name: &str, handler: impl CommandHandler) {
        registry.register(name, Arc::new(handler)).expect("register");
    }

    #[fixture]
    fn dispatcher() -> Dispatcher {
        let registry = CommandRegistry::new();
        register(&registry, "echo_test", |_: &Request| {
            Ok::<_, CommandError>(Reply::output("ok"))
        });
        register(&registry, "spoof", |_: &Request| {
            Ok::<_, CommandError>(
                Reply::output("spoofed")
                    .with_field("id", 1234)
                    .with_field("command", "other"),
            )
        });
        register(&registry, "fails", |_: &Request| -> Result<Reply, CommandError> {
            Err(CommandError::invalid_arguments("address is required"))
        });
        register(&registry, "panics", |_: &Request| -> Result<Reply, CommandError> {
            panic!("handler exploded")
        });
        registry.freeze();
        Dispatcher::new(Arc::new(registry))
    }

    fn to_value(response: &Response) -> Value {
        serde_json::to_value(response).expect("serialise response")
    }

    #[rstest]
    fn echo_handler_yields_exact_response(dispatcher: Dispatcher) {
        let response =
            dispatcher.dispatch_frame(br#"{"type":"command","id":7,"command":"echo_test","args":{}}"#);
        assert_eq!(
            serde_json::to_string(&response).expect("serialise"),
            r#"{"id":7,"type":"response","command":"echo_test","status":"success","output":"ok"}"#
        );
    }

    #[rstest]
    fn handler_cannot_override_correlation(dispatcher: Dispatcher) {
        let response =
            dispatcher.dispatch_frame(br#"{"type":"command","id":41,"command":"spoof"}"#);
        let value = to_value(&response);
        assert_eq!(value["id"], 41);
        assert_eq!(value["command"], "spoof");
    }

    #[rstest]
    #[case::unknown(br#"{"type":"command","id":3,"command":"nope"}"#.as_slice(), "invalid_command")]
    #[case::empty(br#"{"type":"command","id":3,"command":""}"#.as_slice(), "invalid_command")]
    #[case::wrong_type(br#"{"type":"response","id":3,"command":"echo_test"}"#.as_slice(), "invalid_message_type")]
    #[case::panic(br#"{"type":"command","id":3,"command":"panics"}"#.as_slice(), "command_failed")]
    fn protocol_failures_use_error_type(
        dispatcher: Dispatcher,
        #[case] frame: &[u8],
        #[case] code: &str,
    ) {
        let value = to_value(&dispatcher.dispatch_frame(frame));
        assert_eq!(value["type"], "error");
        assert_eq!(value["id"], 3);
        assert_eq!(value["status"], "error");
        assert_eq!(value["error_code"], code);
    }

    #[rstest]
    fn handler_errors_are_responses(dispatcher: Dispatcher) {
        let value =
            to_value(&dispatcher.dispatch_frame(br#"{"type":"command","id":9,"command":"fails"}"#));
        assert_eq!(
            value,
            json!({
                "id": 9,
                "type": "response",
                "command": "fails",
                "status": "error",
                "error": "invalid arguments: address is required",
                "error_code": "invalid_arguments",
                "error_category": "CommandSyntax",
                "suggestion": ErrorCategory::CommandSyntax.suggestion(),
            })
        );
    }

    #[rstest]
    fn malformed_frames_get_uncorrelated_error(dispatcher: Dispatcher) {
        let value = to_value(&dispatcher.dispatch_frame(b"{not json"));
        assert_eq!(value["type"], "error");
        assert_eq!(value["error_code"], "invalid_message");
        assert!(value.get("id").is_none());
    }

    #[rstest]
    fn panics_do_not_poison_later_dispatches(dispatcher: Dispatcher) {
        let _ = dispatcher.dispatch_frame(br#"{"type":"command","id":1,"command":"panics"}"#);
        let value =
            to_value(&dispatcher.dispatch_frame(br#"{"type":"command","id":2,"command":"echo_test"}"#));
        assert_eq!(value["status"], "success");
    }
}
