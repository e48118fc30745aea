use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Rejection produced when untrusted input does not match the expected shape.
///
/// Every rejection carries the path of the offending field (e.g.
/// `body[2].facts[11]`) so an agent can fix the payload without guessing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{}expected {}, received {}", path_prefix(.path), .expected, .received)]
pub struct ValidationError {
    /// Location of the offending field, dotted with `[index]` for array items
    pub path: String,
    /// Description of the accepted shape
    pub expected: String,
    /// Short description of what was actually found
    pub received: String,
}

impl ValidationError {
    pub fn new(
        path: impl Into<String>,
        expected: impl Into<String>,
        received: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            expected: expected.into(),
            received: received.into(),
        }
    }

    /// Rejection for a value with the wrong JSON shape.
    pub fn mistyped(path: impl Into<String>, expected: impl Into<String>, value: &Value) -> Self {
        Self::new(path, expected, describe_value(value))
    }

    /// Rejection for a required field that is absent.
    pub fn missing(path: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::new(path, expected, "nothing")
    }

    /// Prefix the path with an enclosing field, e.g. `body[0]` -> `card.body[0]`.
    pub fn nested_under(mut self, parent: &str) -> Self {
        self.path = if self.path.is_empty() {
            parent.to_string()
        } else if self.path.starts_with('[') {
            format!("{parent}{}", self.path)
        } else {
            format!("{parent}.{}", self.path)
        };
        self
    }
}

fn path_prefix(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!("{path}: ")
    }
}

/// Short, stable description of a JSON value for error messages.
pub fn describe_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => {
            let preview: String = s.chars().take(40).collect();
            if preview.len() < s.len() {
                format!("string \"{preview}...\"")
            } else {
                format!("string \"{preview}\"")
            }
        }
        Value::Array(items) => format!("array of {} item(s)", items.len()),
        Value::Object(_) => "object".to_string(),
    }
}

/// Which of the failure categories a tool call ended in.
///
/// Remediation differs per category (fix secrets, fix the payload, retry later)
/// so results must never collapse them into one generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Configuration,
    Auth,
    Validation,
    Transport,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Configuration => codes::CONFIGURATION_ERROR,
            ErrorCategory::Auth => codes::AUTH_FAILED,
            ErrorCategory::Validation => codes::VALIDATION_FAILED,
            ErrorCategory::Transport => codes::TRANSPORT_ERROR,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error codes used across the bridge
pub mod codes {
    pub const CONFIGURATION_ERROR: &str = "configuration_error";
    pub const AUTH_FAILED: &str = "auth_failed";
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const TRANSPORT_ERROR: &str = "transport_error";
    pub const UNKNOWN_TOOL: &str = "unknown_tool";
}
