use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tunesmith::agent::{DEFAULT_MAX_TURNS, DEFAULT_TOOL_TIMEOUT};
use tunesmith::credentials::GROQ_API_KEY;
use tunesmith::policy::{DEFAULT_PLAYLIST_SIZE, MAX_PLAYLIST_SIZE};
use tunesmith::providers::configs::{OpenAiProviderConfig, GROQ_HOST, GROQ_MODEL};

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    /// Resolve the configured host, which may be a name such as `localhost`
    pub async fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidAddress {
            addr: format!("{}:{}", self.host, self.port),
            reason,
        };
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| invalid(e.to_string()))?
            .next()
            .ok_or_else(|| invalid("the host resolved to no addresses".to_string()))
    }
}

/// The hosted model, reached over an OpenAI-compatible API
#[derive(Debug, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "default_model_host")]
    pub host: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<i32>,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
}

impl ModelSettings {
    pub fn provider_config(&self) -> Result<OpenAiProviderConfig, ConfigError> {
        let api_key = self.api_key.clone().ok_or_else(|| ConfigError::MissingEnvVar {
            env_var: GROQ_API_KEY.to_string(),
        })?;
        Ok(OpenAiProviderConfig::groq(api_key)
            .with_host(&self.host)
            .with_model(&self.model)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
            .with_timeout(Duration::from_secs(self.timeout_secs)))
    }
}

#[derive(Debug, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_tool_providers")]
    pub tool_providers: PathBuf,
    #[serde(default)]
    pub policy_file: Option<PathBuf>,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_playlist_size")]
    pub default_playlist_size: usize,
    #[serde(default = "max_playlist_size")]
    pub max_playlist_size: usize,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub model: ModelSettings,
    pub agent: AgentSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Server defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            // Model defaults
            .set_default("model.host", default_model_host())?
            .set_default("model.model", default_model())?
            // Agent defaults
            .set_default(
                "agent.tool_providers",
                default_tool_providers().to_string_lossy().to_string(),
            )?
            // Optional file in the working directory
            .add_source(File::with_name("tunesmith").required(false))
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("TUNESMITH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(mut settings) => {
                if settings.model.api_key.is_none() {
                    settings.model.api_key = std::env::var(GROQ_API_KEY)
                        .ok()
                        .filter(|key| !key.trim().is_empty());
                }
                Ok(settings)
            }
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // Handle both NotFound and missing field message variants
                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
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
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_model_host() -> String {
    GROQ_HOST.to_string()
}

fn default_model() -> String {
    GROQ_MODEL.to_string()
}

fn default_model_timeout_secs() -> u64 {
    120
}

fn default_tool_providers() -> PathBuf {
    PathBuf::from("tool_providers.yaml")
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

fn default_tool_timeout_secs() -> u64 {
    DEFAULT_TOOL_TIMEOUT.as_secs()
}

fn default_playlist_size() -> usize {
    DEFAULT_PLAYLIST_SIZE
}

fn max_playlist_size() -> usize {
    MAX_PLAYLIST_SIZE
}
