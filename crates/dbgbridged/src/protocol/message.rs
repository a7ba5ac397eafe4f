//! Request, response and notification shapes.

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display};

use super::codec::CodecError;

/// Value of the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageKind {
    /// Client request.
    Command,
    /// Correlated reply to a command.
    Response,
    /// Protocol-level failure.
    Error,
    /// Unsolicited server push.
    Notification,
}

/// Value of the `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Status {
    /// The command produced a reply.
    Success,
    /// The message carries a failure payload.
    Error,
}

/// Machine readable failure code carried in `error_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    /// The frame was not a JSON request.
    InvalidMessage,
    /// The request `type` was not `command`.
    InvalidMessageType,
    /// The command name was empty or unregistered.
    InvalidCommand,
    /// The handler panicked or failed outside its own error reporting.
    CommandFailed,
    /// The handler rejected its arguments.
    InvalidArguments,
    /// The native call reported a failure.
    ExecutionFailed,
    /// The native call did not finish within its timeout.
    Timeout,
    /// No debugging session is available to run the call.
    SessionUnavailable,
}

impl ErrorCode {
    /// Protocol-level codes are sent with `type: "error"`.
    #[must_use]
    pub const fn is_protocol(self) -> bool {
        matches!(
            self,
            Self::InvalidMessage
                | Self::InvalidMessageType
                | Self::InvalidCommand
                | Self::CommandFailed
        )
    }
}

/// Failure taxonomy reported in `error_category`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
pub enum ErrorCategory {
    /// Malformed or unknown debugger command.
    CommandSyntax,
    /// Target not in a state that allows the command.
    ExecutionContext,
    /// The call ran past its deadline.
    Timeout,
    /// Symbol, module or address could not be resolved.
    SymbolOrTargetResolution,
    /// Access was refused.
    PermissionDenied,
    /// Memory could not be read or written.
    MemoryAccess,
    /// The debugger or host ran out of a resource.
    ResourceExhaustion,
    /// The debugger or target went away.
    ConnectionLost,
    /// Fault inside the bridge itself.
    InternalError,
    /// Nothing matched.
    Unknown,
}

impl ErrorCategory {
    /// Operator-facing hint for recovering from a failure in this category.
    #[must_use]
    pub const fn suggestion(self) -> &'static str {
        match self {
            Self::CommandSyntax => {
                "Check the command syntax; the debugger's help command lists valid usage."
            }
            Self::ExecutionContext => {
                "Ensure the target is in the expected process, thread and frame before retrying."
            }
            Self::Timeout => {
                "Increase the timeout or split the command into smaller steps."
            }
            Self::SymbolOrTargetResolution => {
                "Check that symbols are loaded and the symbol or address exists in the target."
            }
            Self::PermissionDenied => {
                "The debugger lacks the privileges required; check ptrace and process permissions."
            }
            Self::MemoryAccess => {
                "The address is not readable in the target; verify it is mapped and valid."
            }
            Self::ResourceExhaustion => {
                "The system is low on resources; narrow the request or free resources and retry."
            }
            Self::ConnectionLost => {
                "The debugging session is gone; restart the debugger or reattach to the target."
            }
            Self::InternalError => "An internal error occurred; check the daemon logs and retry.",
            Self::Unknown => "Check the command syntax and the current debugging context.",
        }
    }
}

/// Inbound request.
///
/// Unknown fields are ignored; a missing `id` reads as `0` and missing or
/// `null` `args` as an empty bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    id: i64,
    #[serde(default)]
    command: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    args: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Map<String, Value>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl Request {
    /// Builds a `command` request.
    pub fn command(id: i64, command: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            kind: MessageKind::Command.to_string(),
            id,
            command: command.into(),
            args,
        }
    }

    /// Parses a single frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] if the frame is not UTF-8 JSON
    /// describing an object of the request shape.
    pub fn parse(frame: &[u8]) -> Result<Self, CodecError> {
        let text = std::str::from_utf8(frame)
            .map_err(|error| CodecError::malformed(format!("frame is not UTF-8: {error}")))?;
        serde_json::from_str(text).map_err(CodecError::from_json_error)
    }

    /// Raw `type` field.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Whether the request carries `type: "command"`.
    #[must_use]
    pub fn is_command(&self) -> bool {
        self.kind == MessageKind::Command.as_ref()
    }

    /// Correlation id echoed on the response.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    /// Command name as sent.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.command
    }

    /// Argument bag.
    #[must_use]
    pub const fn args(&self) -> &Map<String, Value> {
        &self.args
    }

    /// String argument, if present and a string.
    #[must_use]
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }
}

/// Successful handler result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    output: Option<String>,
    fields: Map<String, Value>,
}

impl Reply {
    /// Reply carrying `output`.
    pub fn output(text: impl Into<String>) -> Self {
        Self {
            output: Some(text.into()),
            fields: Map::new(),
        }
    }

    /// Reply with no `output` field.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds an extra top-level field.
    ///
    /// Fields colliding with the envelope (`id`, `type`, `command`, `status`,
    /// `output`) are ignored on serialisation.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Output text, if any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Extra field by name.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Failure payload carried by an error response.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    error: String,
    code: ErrorCode,
    category: ErrorCategory,
    suggestion: String,
    fields: Map<String, Value>,
}

impl Failure {
    /// Builds a failure whose suggestion is the category default.
    pub fn new(code: ErrorCode, category: ErrorCategory, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
            category,
            suggestion: category.suggestion().to_owned(),
            fields: Map::new(),
        }
    }

    /// Replaces the suggestion text.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }

    /// Adds an extra top-level field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Human-readable failure text sent as `error`.
    #[must_use]
    pub fn error(&self) -> &str {
        &self.error
    }

    /// Value of `error_code`.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Value of `error_category`.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.category
    }

    /// Recovery hint sent as `suggestion`.
    #[must_use]
    pub fn suggestion(&self) -> &str {
        &self.suggestion
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Body {
    Success(Reply),
    Failure(Failure),
}

/// Response to a request.
///
/// `id` and `command` are fixed at construction; handlers never see or set
/// them.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    id: Option<i64>,
    kind: MessageKind,
    command: Option<String>,
    body: Body,
}

const ENVELOPE_KEYS: [&str; 9] = [
    "id",
    "type",
    "command",
    "status",
    "output",
    "error",
    "error_code",
    "error_category",
    "suggestion",
];

impl Response {
    /// Successful response for request `id`.
    pub fn success(id: i64, command: impl Into<String>, reply: Reply) -> Self {
        Self {
            id: Some(id),
            kind: MessageKind::Response,
            command: Some(command.into()),
            body: Body::Success(reply),
        }
    }

    /// Handler-reported failure, sent with `type: "response"` unless the code is
    /// protocol-level.
    pub fn failure(id: i64, command: impl Into<String>, failure: Failure) -> Self {
        let kind = if failure.code.is_protocol() {
            MessageKind::Error
        } else {
            MessageKind::Response
        };
        Self {
            id: Some(id),
            kind,
            command: Some(command.into()),
            body: Body::Failure(failure),
        }
    }

    /// Protocol-level failure, sent with `type: "error"`.
    ///
    /// `id` and `command` are omitted when the frame could not be read far
    /// enough to know them.
    pub fn protocol_error(id: Option<i64>, command: Option<String>, failure: Failure) -> Self {
        Self {
            id,
            kind: MessageKind::Error,
            command,
            body: Body::Failure(failure),
        }
    }

    /// Id of the request this answers, if it could be read.
    #[must_use]
    pub const fn id(&self) -> Option<i64> {
        self.id
    }

    /// Either [`MessageKind::Response`] or [`MessageKind::Error`].
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Echoed command name.
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Derived from whether the body is a reply or a failure.
    #[must_use]
    pub const fn status(&self) -> Status {
        match self.body {
            Body::Success(_) => Status::Success,
            Body::Failure(_) => Status::Error,
        }
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(id) = self.id {
            map.serialize_entry("id", &id)?;
        }
        map.serialize_entry("type", &self.kind)?;
        if let Some(command) = &self.command {
            map.serialize_entry("command", command)?;
        }
        map.serialize_entry("status", &self.status())?;
        let extra = match &self.body {
            Body::Success(reply) => {
                if let Some(output) = &reply.output {
                    map.serialize_entry("output", output)?;
                }
                &reply.fields
            }
            Body::Failure(failure) => {
                map.serialize_entry("error", &failure.error)?;
                map.serialize_entry("error_code", &failure.code)?;
                map.serialize_entry("error_category", &failure.category)?;
                map.serialize_entry("suggestion", &failure.suggestion)?;
                &failure.fields
            }
        };
        for (key, value) in extra {
            if !ENVELOPE_KEYS.contains(&key.as_str()) {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

/// Unsolicited message pushed to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    kind: MessageKind,
    event: String,
    data: Value,
}

impl Notification {
    /// Builds a notification for `event` carrying `data`.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            kind: MessageKind::Notification,
            event: event.into(),
            data,
        }
    }

    /// Event name.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }
}

/// Anything queued for delivery on a connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    /// Reply to a request read on the same connection.
    Response(Response),
    /// Server-initiated push.
    Notification(Notification),
}

impl From<Response> for Outbound {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<Notification> for Outbound {
    fn from(notification: Notification) -> Self {
        Self::Notification(notification)
    }
}
