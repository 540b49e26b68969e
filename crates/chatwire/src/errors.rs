use thiserror::Error;

/// Reasons a tool payload could not be flattened into text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolContentError {
    #[error("tool content was empty")]
    Empty,

    #[error("could not serialize tool content: {0}")]
    Serialization(String),
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProviderError {
    /// An error envelope returned by the vendor API.
    #[error("{kind}: {message}")]
    Api {
        kind: String,
        message: String,
        code: Option<String>,
    },

    /// A non-success status whose body was not a recognizable error envelope.
    #[error("error response with status {0}")]
    Status(u16),

    #[error("no response from model")]
    NoResponse,

    #[error("failed to serialize tool response: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    ToolContent(#[from] ToolContentError),
}

impl ProviderError {
    pub fn api<K: Into<String>, M: Into<String>>(kind: K, message: M) -> Self {
        ProviderError::Api {
            kind: kind.into(),
            message: message.into(),
            code: None,
        }
    }
}

/// Errors while loading [`crate::configuration::Settings`]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// The environment variable that sets a provider setting, e.g. `api_key`
/// becomes `CHATWIRE_PROVIDER__API_KEY`.
pub fn to_env_var(field: &str) -> String {
    let path = match field {
        "provider" => "provider.type".to_string(),
        field if field.contains('.') => field.to_string(),
        field => format!("provider.{}", field),
    };
    format!("CHATWIRE_{}", path.replace('.', "__").to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("api_key"), "CHATWIRE_PROVIDER__API_KEY");
        assert_eq!(to_env_var("type"), "CHATWIRE_PROVIDER__TYPE");
        assert_eq!(to_env_var("provider"), "CHATWIRE_PROVIDER__TYPE");
        assert_eq!(to_env_var("provider.model"), "CHATWIRE_PROVIDER__MODEL");
    }

    #[test]
    fn test_api_error_display() {
        let err = ProviderError::api("invalid_request_error", "max_tokens is too large");
        assert_eq!(
            err.to_string(),
            "invalid_request_error: max_tokens is too large"
        );
    }

    #[test]
    fn test_status_error_display() {
        assert_eq!(
            ProviderError::Status(502).to_string(),
            "error response with status 502"
        );
    }
}
