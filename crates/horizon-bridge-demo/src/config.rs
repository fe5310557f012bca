//! Demo configuration.
//!
//! Read from a TOML file; every key is optional. Without a file the demo
//! talks to `localhost:10000` and trusts the certificate bundled with it.
//!
//! ```toml
//! target = "localhost:10000"
//! server_name = "x.test.example.com"
//! trust_bundle = "certs/ca.pem"
//! connect_timeout_ms = 5000
//! call_timeout_ms = 10000
//! known_user_id = "1234"
//! unknown_user_id = "123"
//! stream_count = 3
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use horizon_bridge::grpc::{CallOptions, ChannelConfig};
use horizon_bridge::tls::{TransportCredentials, TrustAnchor};
use serde::Deserialize;

use crate::error::{DemoError, Result};

/// Certificate of the demo backend.
pub const EMBEDDED_SERVER_PEM: &str = include_str!("../assets/server.pem");

/// Settings for one demo run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemoConfig {
    /// `host:port` of the backend.
    pub target: String,
    /// Name to verify the server certificate against instead of the host.
    pub server_name: Option<String>,
    /// PEM bundle to trust instead of the embedded certificate.
    pub trust_bundle: Option<PathBuf>,
    /// Limit on establishing the connection.
    pub connect_timeout_ms: u64,
    /// Per-call deadline. No deadline when unset.
    pub call_timeout_ms: Option<u64>,
    /// User id the backend knows.
    pub known_user_id: String,
    /// User id the backend does not know.
    pub unknown_user_id: String,
    /// How many users to stream.
    pub stream_count: i64,
    /// `id` of the HTML container element.
    pub container_id: String,
    /// `tracing` filter for library diagnostics rendered into the document.
    pub log_filter: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            target: "localhost:10000".to_string(),
            server_name: None,
            trust_bundle: None,
            connect_timeout_ms: 20_000,
            call_timeout_ms: None,
            known_user_id: "1234".to_string(),
            unknown_user_id: "123".to_string(),
            stream_count: 3,
            container_id: "target".to_string(),
            log_filter: "horizon_bridge=warn".to_string(),
        }
    }
}

impl DemoConfig {
    /// Load from `path`. No path, or a path that does not exist, gives the
    /// defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!("No configuration at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(DemoError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::from_toml(&text).map_err(|source| DemoError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.stream_count < 0 {
            return Err(DemoError::Invalid(format!(
                "stream_count must not be negative, got {}",
                self.stream_count
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(DemoError::Invalid("connect_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// The trust anchor: the configured bundle, or the embedded certificate.
    pub fn trust_anchor(&self) -> Result<TrustAnchor> {
        match &self.trust_bundle {
            Some(path) => {
                let pem = fs::read(path).map_err(|source| DemoError::Io {
                    path: path.clone(),
                    source,
                })?;
                Ok(TrustAnchor::from_pem(pem)?)
            }
            None => Ok(TrustAnchor::from_pem(EMBEDDED_SERVER_PEM)?),
        }
    }

    /// Channel settings for this run. The sink is left for the driver.
    pub fn channel_config(&self) -> Result<ChannelConfig> {
        self.validate()?;
        let credentials = TransportCredentials::from_trust_anchor(&self.trust_anchor()?)?;
        let mut config = ChannelConfig::new(self.target.clone(), credentials)
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .user_agent(concat!("horizon-bridge-demo/", env!("CARGO_PKG_VERSION")));
        if let Some(name) = &self.server_name {
            config = config.server_name(name.clone());
        }
        Ok(config)
    }

    /// Options applied to every call of the run.
    pub fn call_options(&self) -> CallOptions {
        match self.call_timeout_ms {
            Some(ms) => CallOptions::new().timeout(Duration::from_millis(ms)),
            None => CallOptions::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_demo_backend() {
        let config = DemoConfig::default();
        assert_eq!(config.target, "localhost:10000");
        assert_eq!(config.known_user_id, "1234");
        assert_eq!(config.unknown_user_id, "123");
        assert_eq!(config.stream_count, 3);
        assert!(config.call_options().timeout.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DemoConfig::from_toml(
            r#"
            target = "backend.test:443"
            call_timeout_ms = 1500
            "#,
        )
        .unwrap();
        assert_eq!(config.target, "backend.test:443");
        assert_eq!(config.stream_count, 3);
        assert_eq!(
            config.call_options().timeout,
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(DemoConfig::from_toml("tagret = \"typo:1\"").is_err());
    }

    #[test]
    fn test_embedded_certificate_is_usable() {
        let anchor = DemoConfig::default().trust_anchor().unwrap();
        assert_eq!(anchor.len(), 1);
        assert!(DemoConfig::default().channel_config().is_ok());
    }

    #[test]
    fn test_negative_stream_count_is_invalid() {
        let config = DemoConfig {
            stream_count: -1,
            ..DemoConfig::default()
        };
        assert!(matches!(config.validate(), Err(DemoError::Invalid(_))));
    }
}
