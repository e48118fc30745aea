use std::time::Duration;

use serde_json::Value;

use crate::config::ConfigError;

/// Shared HTTP client; every outbound call (token exchange included) inherits its timeout.
pub fn client(timeout: Duration) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("teams-mcp/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ConfigError::Invalid {
            setting: "http client",
            reason: e.to_string(),
        })
}

pub fn parse_response_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).to_string()))
}

pub fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_body_falls_back_to_text() {
        assert_eq!(parse_response_body(b""), Value::Null);
        assert_eq!(parse_response_body(br#"{"id":"1"}"#), json!({ "id": "1" }));
        assert_eq!(
            parse_response_body(b"<html>bad gateway</html>"),
            json!("<html>bad gateway</html>")
        );
    }
}
