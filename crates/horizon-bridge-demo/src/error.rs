//! Errors for the demo driver.

use std::io;
use std::path::PathBuf;

use horizon_bridge::BridgeError;
use thiserror::Error;

/// Everything that can stop the demo before or after the call sequence.
#[derive(Error, Debug)]
pub enum DemoError {
    /// The configuration file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML for [`DemoConfig`](crate::config::DemoConfig).
    #[error("invalid configuration in {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The bridge rejected the setup.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Result alias for the demo.
pub type Result<T> = std::result::Result<T, DemoError>;
