//! Error types for configuration loading.

use std::fmt;
use std::io;

/// Error loading or validating a broker configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    Io(io::Error),
    /// The file is not valid TOML.
    Parse(toml::de::Error),
    /// No primary server address was configured. Without one the broker
    /// cannot operate at all.
    MissingPrimary,
    /// The primary server address did not parse.
    InvalidPrimary(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read configuration: {e}"),
            ConfigError::Parse(e) => write!(f, "invalid configuration: {e}"),
            ConfigError::MissingPrimary => write!(f, "no primary server address configured"),
            ConfigError::InvalidPrimary(addr) => {
                write!(f, "invalid primary server address: {addr:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}
