//! Broker configuration.
//!
//! Loaded once at startup and optionally replaced at runtime through
//! [`Broker::reconfigure`](crate::Broker::reconfigure), which routes the new
//! value through the request queue so it is never applied concurrently with
//! an in-flight transaction.
//!
//! The file format mirrors the classic `[server]` section:
//!
//! ```toml
//! [server]
//! client_id = "acme"          # optional, defaults to "default"
//! port = 55001                # optional, shared by both addresses
//! primary_ip = "10.0.0.10"    # required
//! secondary_ip = "10.0.0.11"  # optional failover address
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::codec;
use crate::error::ConfigError;

/// Default client identifier when the file does not name one.
pub const DEFAULT_CLIENT_ID: &str = "default";

/// Well-known Sparkgap server port.
pub const DEFAULT_PORT: u16 = 55001;

/// Connection configuration handed to the broker as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Client identifier sent in every request.
    pub client_id: String,
    /// Primary server address. Required; without it the broker is disabled.
    pub primary: SocketAddr,
    /// Optional failover address, tried when the primary is unreachable.
    pub secondary: Option<SocketAddr>,
}

impl ServerConfig {
    /// Configuration with the default client id and no secondary address.
    pub fn new(primary: SocketAddr) -> ServerConfig {
        ServerConfig {
            client_id: DEFAULT_CLIENT_ID.to_owned(),
            primary,
            secondary: None,
        }
    }

    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<ServerConfig, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        ServerConfig::parse(&text)
    }

    /// Truncate the client identifier to the wire field limit, in place.
    ///
    /// `client_id` is a public field, so values that never went through
    /// [`ServerConfig::parse`] can exceed the limit; the connection manager
    /// applies this before any request is encoded.
    pub(crate) fn clamp_client_id(&mut self) {
        self.client_id
            .truncate(codec::clamp_client_id(&self.client_id).len());
    }

    /// Parse and validate configuration text.
    pub fn parse(text: &str) -> Result<ServerConfig, ConfigError> {
        let file: ConfigFile = toml::from_str(text)?;
        let server = file.server.unwrap_or_default();

        let port = server.port.unwrap_or(DEFAULT_PORT);
        let client_id =
            codec::clamp_client_id(server.client_id.as_deref().unwrap_or(DEFAULT_CLIENT_ID))
                .to_owned();

        let primary_ip = server.primary_ip.ok_or(ConfigError::MissingPrimary)?;
        let primary = match primary_ip.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, port),
            Err(_) => return Err(ConfigError::InvalidPrimary(primary_ip)),
        };

        // A bad secondary only disables failover; it does not disable the
        // broker.
        let secondary = server.secondary_ip.and_then(|s| match s.parse::<IpAddr>() {
            Ok(ip) => Some(SocketAddr::new(ip, port)),
            Err(_) => {
                warn!(address = %s, "ignoring invalid secondary server address");
                None
            }
        });

        Ok(ServerConfig {
            client_id,
            primary,
            secondary,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    server: Option<ServerSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    client_id: Option<String>,
    port: Option<u16>,
    primary_ip: Option<String>,
    secondary_ip: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_parses() {
        let cfg = ServerConfig::parse(
            r#"
            [server]
            client_id = "acme"
            port = 6000
            primary_ip = "10.0.0.10"
            secondary_ip = "10.0.0.11"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.client_id, "acme");
        assert_eq!(cfg.primary, "10.0.0.10:6000".parse().unwrap());
        assert_eq!(cfg.secondary, Some("10.0.0.11:6000".parse().unwrap()));
    }

    #[test]
    fn defaults_apply_when_fields_absent() {
        let cfg = ServerConfig::parse(
            r#"
            [server]
            primary_ip = "10.0.0.10"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.client_id, DEFAULT_CLIENT_ID);
        assert_eq!(cfg.primary.port(), DEFAULT_PORT);
        assert_eq!(cfg.secondary, None);
    }

    #[test]
    fn missing_primary_is_an_error() {
        let err = ServerConfig::parse("[server]\nclient_id = \"x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingPrimary));

        let err = ServerConfig::parse("").unwrap_err();
        assert!(matches!(err, ConfigError::MissingPrimary));
    }

    #[test]
    fn unparseable_primary_is_an_error() {
        let err = ServerConfig::parse("[server]\nprimary_ip = \"not-an-ip\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPrimary(_)));
    }

    #[test]
    fn invalid_secondary_disables_failover_only() {
        let cfg = ServerConfig::parse(
            r#"
            [server]
            primary_ip = "10.0.0.10"
            secondary_ip = "bogus"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.secondary, None);
    }

    #[test]
    fn overlong_client_id_is_clamped() {
        let cfg = ServerConfig::parse(
            "[server]\nclient_id = \"0123456789012345678901234\"\nprimary_ip = \"10.0.0.10\"\n",
        )
        .unwrap();
        assert_eq!(cfg.client_id.len(), codec::CLIENT_ID_MAX);
    }
}
