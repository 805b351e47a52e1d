use thiserror::Error;

/// Startup configuration failures. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bot token is missing: set BOT_TOKEN or [telegram] bot_token")]
    MissingToken,

    #[error("no admin ids configured")]
    NoAdmins,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// A single outbound call to one recipient failed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("platform error: {0}")]
    Platform(String),
}

/// The inbound update loop could not be started or stopped unexpectedly.
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("receive loop exited without a shutdown request")]
    LoopExited,

    #[error("platform error: {0}")]
    Platform(String),
}
