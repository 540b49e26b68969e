use anyhow::Result;
use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::ProviderError;

/// Resolve the base URL for a vendor client.
///
/// An empty `host` falls back to `default`; any other host is made to end in
/// `suffix` (for example `/v1`) exactly once.
pub fn normalize_base_url(host: &str, default: &str, suffix: &str) -> String {
    let host = host.trim();
    if host.is_empty() {
        return default.to_string();
    }
    let trimmed = host.trim_end_matches('/');
    if trimmed.ends_with(suffix) {
        trimmed.to_string()
    } else {
        format!("{}{}", trimmed, suffix)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Structured {
        #[serde(rename = "type", alias = "status", default)]
        kind: Option<String>,
        #[serde(default)]
        message: String,
        #[serde(default)]
        code: Option<Value>,
    },
    Message(String),
}

/// Convert a non-success response body into a [`ProviderError`].
///
/// Understands `{"error": {"type", "message", "code"}}` (OpenAI, Anthropic),
/// `{"error": {"status", "message", "code"}}` (Google) and
/// `{"error": "..."}` (Ollama). Anything else is reported by status code.
pub fn api_error(status: u16, body: &[u8]) -> ProviderError {
    match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope {
            error: ErrorDetail::Structured { kind, message, code },
        }) => ProviderError::Api {
            kind: kind.unwrap_or_else(|| "api_error".to_string()),
            message,
            code: code.map(|c| match c {
                Value::String(s) => s,
                other => other.to_string(),
            }),
        },
        Ok(ErrorEnvelope {
            error: ErrorDetail::Message(message),
        }) => ProviderError::api("api_error", message),
        Err(e) => {
            tracing::debug!(status, error = %e, "could not decode error envelope");
            ProviderError::Status(status)
        }
    }
}

/// Decode a successful JSON body, or turn the failure into a [`ProviderError`]
pub async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let body = response.bytes().await?;
    let err = api_error(status.as_u16(), &body);
    tracing::debug!(status = status.as_u16(), error = %err, "request failed");
    Err(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        let default = "https://api.openai.com/v1";
        assert_eq!(normalize_base_url("", default, "/v1"), default);
        assert_eq!(
            normalize_base_url("https://proxy.local", default, "/v1"),
            "https://proxy.local/v1"
        );
        assert_eq!(
            normalize_base_url("https://proxy.local/", default, "/v1"),
            "https://proxy.local/v1"
        );
        assert_eq!(
            normalize_base_url("https://proxy.local/v1/", default, "/v1"),
            "https://proxy.local/v1"
        );
    }

    #[test]
    fn test_api_error_structured() {
        let body = br#"{"error": {"type": "overloaded_error", "message": "Overloaded"}}"#;
        let err = api_error(529, body);
        assert_eq!(err.to_string(), "overloaded_error: Overloaded");
    }

    #[test]
    fn test_api_error_with_code() {
        let body = br#"{"error": {"type": "invalid_request_error", "message": "too long", "code": "context_length_exceeded"}}"#;
        match api_error(400, body) {
            ProviderError::Api { code, .. } => {
                assert_eq!(code.as_deref(), Some("context_length_exceeded"))
            }
            other => panic!("Expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn test_api_error_google_status() {
        let body = br#"{"error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}}"#;
        match api_error(400, body) {
            ProviderError::Api { kind, message, code } => {
                assert_eq!(kind, "INVALID_ARGUMENT");
                assert_eq!(message, "API key not valid");
                assert_eq!(code.as_deref(), Some("400"));
            }
            other => panic!("Expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn test_api_error_plain_string() {
        let err = api_error(404, br#"{"error": "model 'llama9' not found"}"#);
        assert_eq!(err.to_string(), "api_error: model 'llama9' not found");
    }

    #[test]
    fn test_api_error_undecodable() {
        let err = api_error(502, b"<html>Bad Gateway</html>");
        assert!(matches!(err, ProviderError::Status(502)));
        assert_eq!(err.to_string(), "error response with status 502");
    }
}
