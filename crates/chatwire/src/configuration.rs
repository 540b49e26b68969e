//! Provider selection from a TOML file and `CHATWIRE_`-prefixed environment
//! variables, e.g. `CHATWIRE_PROVIDER__TYPE=anthropic`.
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;

use crate::errors::{to_env_var, ConfigError};
use crate::providers::{
    anthropic, google,
    configs::{
        AnthropicProviderConfig, GoogleProviderConfig, OllamaProviderConfig, OpenAiProviderConfig,
        ProviderConfig,
    },
    factory::ProviderType,
    ollama, openai,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    Anthropic {
        #[serde(default = "default_anthropic_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_anthropic_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    Google {
        #[serde(default = "default_google_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_google_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    Ollama {
        #[serde(default = "default_ollama_host")]
        host: String,
        #[serde(default = "default_ollama_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
}

impl ProviderSettings {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderSettings::OpenAi { .. } => ProviderType::OpenAi,
            ProviderSettings::Anthropic { .. } => ProviderType::Anthropic,
            ProviderSettings::Google { .. } => ProviderType::Google,
            ProviderSettings::Ollama { .. } => ProviderType::Ollama,
        }
    }

    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            }),
            ProviderSettings::Anthropic {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::Anthropic(AnthropicProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            }),
            ProviderSettings::Google {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::Google(GoogleProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            }),
            ProviderSettings::Ollama {
                host,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::Ollama(OllamaProviderConfig {
                host,
                model,
                temperature,
                max_tokens,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub provider: ProviderSettings,
}

impl Settings {
    /// Load from the environment only
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from a TOML file, with environment variables taking precedence
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load(Some(path.as_ref()))
    }

    fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            tracing::debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("CHATWIRE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match config.try_deserialize::<Self>() {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // serde reports "missing field `api_key`", possibly with a key suffix
                let error_str = err.to_string();
                if let Some(field) = error_str
                    .strip_prefix("missing field `")
                    .and_then(|rest| rest.split('`').next())
                {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }

    pub fn into_provider_config(self) -> ProviderConfig {
        self.provider.into_config()
    }
}

fn default_openai_host() -> String {
    openai::OPENAI_BASE_URL.to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_anthropic_host() -> String {
    anthropic::ANTHROPIC_BASE_URL.to_string()
}

fn default_anthropic_model() -> String {
    anthropic::ANTHROPIC_DEFAULT_MODEL.to_string()
}

fn default_google_host() -> String {
    google::GOOGLE_HOST.to_string()
}

fn default_google_model() -> String {
    google::GOOGLE_DEFAULT_MODEL.to_string()
}

fn default_ollama_host() -> String {
    ollama::OLLAMA_HOST.to_string()
}

fn default_ollama_model() -> String {
    ollama::OLLAMA_MODEL.to_string()
}
