//! Session Configuration
//!
//! Extracts the connection parameters from OpenVPN-style configuration text.
//!
//! Only the `remote <host> [port]` directive is interpreted here. Every other
//! directive is opaque protocol configuration for the negotiator, which is why
//! the raw text travels along with the parsed endpoint.

use std::fmt;

/// Port used when a `remote` line has no port or an unparsable one
pub const DEFAULT_PORT: u16 = 1194;

/// Directive token naming the remote endpoint
const REMOTE_DIRECTIVE: &str = "remote";

/// Connection parameters derived from one configuration text.
///
/// Built once per connect attempt and dropped when the attempt ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Remote VPN server host name or address
    pub remote_host: String,
    /// Remote VPN server port
    pub remote_port: u16,
    /// Full configuration text, handed to the negotiator untouched
    pub raw: String,
}

impl SessionConfig {
    /// Parse configuration text.
    ///
    /// Scans every line top to bottom; the last valid `remote` line wins.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut endpoint: Option<(&str, u16)> = None;

        for line in text.lines() {
            if let Some(found) = parse_remote_line(line) {
                endpoint = Some(found);
            }
        }

        let (host, port) = endpoint.ok_or(ConfigError::NoRemoteHost)?;

        Ok(Self {
            remote_host: host.to_string(),
            remote_port: port,
            raw: text.to_string(),
        })
    }

    /// `host:port` form of the remote endpoint
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }
}

impl fmt::Display for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

/// Parse a single line as a `remote` directive.
///
/// Returns `None` for any other directive and for a bare `remote` with no host.
fn parse_remote_line(line: &str) -> Option<(&str, u16)> {
    let mut fields = line.split_whitespace();

    if fields.next()? != REMOTE_DIRECTIVE {
        return None;
    }

    let host = fields.next()?;
    let port = fields
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .filter(|p| *p != 0)
        .unwrap_or(DEFAULT_PORT);

    Some((host, port))
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Config content is empty")]
    Empty,

    #[error("No remote host found in config")]
    NoRemoteHost,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_with_port() {
        let config = SessionConfig::parse("remote vpn.example.com 443\n").unwrap();

        assert_eq!(config.remote_host, "vpn.example.com");
        assert_eq!(config.remote_port, 443);
        assert_eq!(config.endpoint(), "vpn.example.com:443");
    }

    #[test]
    fn test_port_defaults() {
        let missing = SessionConfig::parse("remote vpn.example.com").unwrap();
        assert_eq!(missing.remote_port, DEFAULT_PORT);

        for bad in ["abc", "-1", "70000", "0", "44x"] {
            let text = format!("remote vpn.example.com {}", bad);
            let config = SessionConfig::parse(&text).unwrap();
            assert_eq!(config.remote_port, DEFAULT_PORT, "port field {:?}", bad);
        }
    }

    #[test]
    fn test_last_remote_wins() {
        let text = "client\nremote first.example.com 1000\ndev tun\nremote second.example.com 2000\n";
        let config = SessionConfig::parse(text).unwrap();

        assert_eq!(config.remote_host, "second.example.com");
        assert_eq!(config.remote_port, 2000);
    }

    #[test]
    fn test_bare_remote_does_not_override() {
        let text = "remote good.example.com 1195\nremote\n";
        let config = SessionConfig::parse(text).unwrap();

        assert_eq!(config.remote_host, "good.example.com");
    }

    #[test]
    fn test_whitespace_and_tabs() {
        let config = SessionConfig::parse("   remote\t10.0.0.1   8443  udp \r\n").unwrap();

        assert_eq!(config.remote_host, "10.0.0.1");
        assert_eq!(config.remote_port, 8443);
    }

    #[test]
    fn test_similar_directives_ignored() {
        let text = "remote-random\nremote-cert-tls server\n";
        assert_eq!(SessionConfig::parse(text), Err(ConfigError::NoRemoteHost));
    }

    #[test]
    fn test_no_remote_host() {
        assert_eq!(
            SessionConfig::parse("auth-user-pass\n"),
            Err(ConfigError::NoRemoteHost)
        );
    }

    #[test]
    fn test_empty() {
        assert_eq!(SessionConfig::parse(""), Err(ConfigError::Empty));
        assert_eq!(SessionConfig::parse(" \n\t\n"), Err(ConfigError::Empty));
    }

    #[test]
    fn test_raw_text_kept() {
        let text = "remote a.example.com 1194\ncipher AES-256-GCM\n";
        let config = SessionConfig::parse(text).unwrap();

        assert_eq!(config.raw, text);
    }
}
