//! Per-execution output capture.

/// Text the debugger prints when a command produced nothing.
const NO_RESULT_MARKERS: [&str; 2] = ["NONE", "None"];

/// Buffer collecting everything one native call prints.
///
/// A sink belongs to exactly one execution. It is moved into the worker thread
/// and handed back over the completion channel, so two calls never write into
/// the same buffer.
#[derive(Debug, Default)]
pub struct CaptureSink {
    buffer: String,
}

impl CaptureSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw text.
    pub fn push(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// Appends `line` and a newline.
    pub fn push_line(&mut self, line: &str) {
        self.buffer.push_str(line);
        self.buffer.push('\n');
    }

    /// Text captured so far.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Consumes the sink, returning everything captured.
    #[must_use]
    pub fn into_output(self) -> String {
        self.buffer
    }
}

/// Whether `output` carries no result once whitespace and the no-result
/// marker are discounted.
#[must_use]
pub fn is_effectively_empty(output: &str) -> bool {
    let trimmed = output.trim();
    trimmed.is_empty() || NO_RESULT_MARKERS.contains(&trimmed)
}
