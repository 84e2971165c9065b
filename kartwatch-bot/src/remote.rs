//! Parsing and validation of user supplied server addresses and labels.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use thiserror::Error;

/// Port game servers listen on unless told otherwise.
pub const DEFAULT_PORT: u16 = 5029;

pub const MAX_LABEL_LEN: usize = 100;

#[derive(Debug, Error, PartialEq)]
pub enum RemoteError {
    #[error("Remote address cannot be empty")]
    Empty,

    #[error("Remote address has an invalid host")]
    InvalidHost,

    #[error("Remote address has an invalid port ({0})")]
    InvalidPort(String),

    #[error("Label cannot be empty")]
    LabelEmpty,

    #[error("Label too long (max {MAX_LABEL_LEN} characters, got {0})")]
    LabelTooLong(usize),
}

/// Address of a game server.
///
/// Accepted forms:
/// - `203.0.113.7:5029`, `[2001:db8::1]:5029`
/// - `203.0.113.7`, `2001:db8::1`, `[2001:db8::1]` (default port)
/// - `kart.example.org:5030`, `kart.example.org` (default port)
///
/// The [`Display`](fmt::Display) form is canonical and is what gets
/// persisted, so two spellings of one endpoint register as the same server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Remote {
    host: String,
    port: u16,
}

impl Remote {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Looks the host up, returning the first address found.
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses found"))
    }
}

impl From<SocketAddr> for Remote {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for Remote {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RemoteError::Empty);
        }

        if let Ok(addr) = s.parse::<SocketAddr>() {
            if addr.port() == 0 {
                return Err(RemoteError::InvalidPort("0".to_string()));
            }
            return Ok(addr.into());
        }

        let bare = s
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(s);
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return Ok(Self::new(ip.to_string(), DEFAULT_PORT));
        }

        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => (host, parse_port(port)?),
            None => (s, DEFAULT_PORT),
        };

        validate_host(host)?;
        Ok(Self::new(host.to_ascii_lowercase(), port))
    }
}

impl fmt::Display for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn parse_port(port: &str) -> Result<u16, RemoteError> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(RemoteError::InvalidPort(port.to_string())),
        Ok(port) => Ok(port),
    }
}

/// Validates a DNS host name
///
/// Rules:
/// - Cannot be empty
/// - Only ASCII alphanumerics, `-` and `.`
fn validate_host(host: &str) -> Result<(), RemoteError> {
    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(RemoteError::InvalidHost);
    }

    Ok(())
}

/// Validates a server label
///
/// Rules:
/// - Cannot be empty or whitespace only
/// - Max 100 characters
pub fn validate_label(label: &str) -> Result<(), RemoteError> {
    if label.trim().is_empty() {
        return Err(RemoteError::LabelEmpty);
    }

    let len = label.chars().count();
    if len > MAX_LABEL_LEN {
        return Err(RemoteError::LabelTooLong(len));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<String, RemoteError> {
        s.parse::<Remote>().map(|r| r.to_string())
    }

    #[test]
    fn test_ip_with_port() {
        assert_eq!(parse("203.0.113.7:5030"), Ok("203.0.113.7:5030".into()));
        assert_eq!(parse("[2001:db8::1]:5030"), Ok("[2001:db8::1]:5030".into()));
    }

    #[test]
    fn test_default_port() {
        assert_eq!(parse("203.0.113.7"), Ok("203.0.113.7:5029".into()));
        assert_eq!(parse("2001:db8::1"), Ok("[2001:db8::1]:5029".into()));
        assert_eq!(parse("[2001:db8::1]"), Ok("[2001:db8::1]:5029".into()));
        assert_eq!(parse("Kart.Example.org"), Ok("kart.example.org:5029".into()));
    }

    #[test]
    fn test_hostname_with_port() {
        let remote: Remote = " kart.example.org:5030 ".parse().unwrap();
        assert_eq!(remote.host(), "kart.example.org");
        assert_eq!(remote.port(), 5030);
    }

    #[test]
    fn test_invalid_remotes() {
        assert_eq!(parse(""), Err(RemoteError::Empty));
        assert_eq!(parse("   "), Err(RemoteError::Empty));
        assert_eq!(parse("host:0"), Err(RemoteError::InvalidPort("0".into())));
        assert_eq!(
            parse("host:70000"),
            Err(RemoteError::InvalidPort("70000".into()))
        );
        assert_eq!(parse("127.0.0.1:0"), Err(RemoteError::InvalidPort("0".into())));
        assert_eq!(parse(":5029"), Err(RemoteError::InvalidHost));
        assert_eq!(parse("bad host"), Err(RemoteError::InvalidHost));
        assert_eq!(parse("a/b:5029"), Err(RemoteError::InvalidHost));
    }

    #[test]
    fn test_label_validation() {
        assert!(validate_label("Friday Mogi").is_ok());
        assert_eq!(validate_label(""), Err(RemoteError::LabelEmpty));
        assert_eq!(validate_label("  "), Err(RemoteError::LabelEmpty));
        let long = "x".repeat(101);
        assert_eq!(validate_label(&long), Err(RemoteError::LabelTooLong(101)));
    }

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let remote: Remote = "127.0.0.1:5030".parse().unwrap();
        let addr = remote.resolve().await.unwrap();
        assert_eq!(addr, "127.0.0.1:5030".parse::<SocketAddr>().unwrap());
    }
}
