use fedloom_core::{ConfigError, FedError};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Fed(#[from] FedError),

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metrics rendering failed: {0}")]
    Metrics(String),
}
