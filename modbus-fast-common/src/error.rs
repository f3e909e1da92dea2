use thiserror::Error;

/// Common error type for modbus-fast components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("Zenoh error: {0}")]
    Zenoh(#[from] zenoh::Error),

    #[error("Failed to encode {format} payload: {message}")]
    Encode {
        format: &'static str,
        message: String,
    },

    #[error("Failed to decode {format} payload: {message}")]
    Decode {
        format: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid key expression: {0}")]
    KeyExpr(String),
}

impl Error {
    pub(crate) fn encode(format: &'static str, err: impl std::fmt::Display) -> Self {
        Error::Encode {
            format,
            message: err.to_string(),
        }
    }

    pub(crate) fn decode(format: &'static str, err: impl std::fmt::Display) -> Self {
        Error::Decode {
            format,
            message: err.to_string(),
        }
    }
}

/// Result type alias using the common [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
