//! Diagnostic trace accumulation and rendering.
//!
//! Every normalizer state carries a [`StreamTrace`] that accumulates what
//! the backend actually sent — thinking, text, tool calls, metadata — so
//! an operator can inspect a misbehaving stream after the fact.

use std::fmt::Write as _;

/// Accumulated diagnostic record for one stream.
#[derive(Clone, Debug, Default)]
pub struct StreamTrace {
    /// Request URL.
    pub url: String,
    /// Model requested.
    pub model: String,
    /// Accumulated thinking text.
    pub thinking: String,
    /// Accumulated answer text.
    pub text: String,
    /// Tool calls observed: (name, raw argument JSON).
    pub tool_calls: Vec<(String, String)>,
    /// Metadata lines (stop reason, token counts, skipped records).
    pub meta: Vec<String>,
}

impl StreamTrace {
    /// Start a trace for one request.
    #[must_use]
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    /// Record a metadata line.
    pub fn note(&mut self, line: impl Into<String>) {
        self.meta.push(line.into());
    }

    /// Whether nothing was accumulated from the stream body.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.thinking.is_empty()
            && self.text.is_empty()
            && self.tool_calls.is_empty()
            && self.meta.is_empty()
    }
}

/// Render a trace for operator inspection.
///
/// A 2xx stream that accumulated nothing renders the `(empty response)`
/// sentinel. A non-2xx status renders an error section from the raw body,
/// or `(empty error response)` when the body is empty.
#[must_use]
pub fn format_trace(trace: &StreamTrace, http_status: u16, error_body: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Stream trace — {} ({})", trace.model, trace.url);

    if !(200..300).contains(&http_status) {
        let _ = writeln!(out, "\n## Error (HTTP {http_status})");
        if error_body.trim().is_empty() {
            out.push_str("(empty error response)\n");
        } else {
            let _ = writeln!(out, "{}", error_body.trim());
        }
        return out;
    }

    if trace.is_empty() {
        out.push_str("(empty response)\n");
        return out;
    }

    if !trace.thinking.is_empty() {
        let _ = writeln!(out, "\n## Thinking\n{}", trace.thinking);
    }
    if !trace.text.is_empty() {
        let _ = writeln!(out, "\n## Text\n{}", trace.text);
    }
    if !trace.tool_calls.is_empty() {
        out.push_str("\n## Tool calls\n");
        for (name, args) in &trace.tool_calls {
            let _ = writeln!(out, "- {name}: {args}");
        }
    }
    if !trace.meta.is_empty() {
        out.push_str("\n## Metadata\n");
        for line in &trace.meta {
            let _ = writeln!(out, "- {line}");
        }
    }
    out
}
