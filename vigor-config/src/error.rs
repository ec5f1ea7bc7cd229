// Errors raised while assembling scheduler settings

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// A settings source could not be read.
    #[error("Cannot read settings source: {0}")]
    LoadError(String),

    #[error("Malformed settings: {0}")]
    ParseError(String),

    /// An override whose text does not fit the field it targets.
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Settings rejected: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
