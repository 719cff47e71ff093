use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting, set the {env_var} environment variable")]
    MissingEnvVar { env_var: String },

    #[error("Cannot use {addr} as the listen address: {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Map a dotted settings path such as `model.api_key` to the variable that overrides it
pub fn to_env_var(field_path: &str) -> String {
    format!(
        "TUNESMITH_{}",
        field_path.trim().to_uppercase().replace('.', "__")
    )
}
