use thiserror::Error;

/// Rejection of user supplied configuration. Setup aborts on any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config entry: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing `{0}` section")]
    MissingSection(&'static str),

    #[error("{field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("logger setup failed: {0}")]
    Logger(String),

    #[error("alarm panel unavailable")]
    Unavailable,

    #[error("unsupported command `{command}` for {entity}")]
    UnsupportedCommand { entity: String, command: String },
}

pub type Result<T> = std::result::Result<T, Error>;
