//! Immutable descriptor of one remote collection endpoint.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;
use url::Url;

use crate::stats::counter::clip_to_char_boundary;

/// Longest `Host:` header line accepted.
pub const MAX_HOST_HEADER_LEN: usize = "Host: gateway.unionstationapp.com".len() + 32;
/// Longest ping or sink URL accepted.
pub const MAX_URL_LEN: usize =
    "https://[2001:0db8:85a3:0000:0000:8a2e:0370:7334]:3000/sink".len() + 16;
/// Certificate paths longer than this are clipped, not rejected.
pub const MAX_CERTIFICATE_PATH_LEN: usize = 4096;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServerError {
    #[error("Server address is empty")]
    EmptyAddress,

    #[error("Host header for '{host_name}' is {len} bytes, max {max}")]
    HostHeaderTooLong {
        host_name: String,
        len: usize,
        max: usize,
    },

    #[error("URL '{url}' is {len} bytes, max {max}")]
    UrlTooLong { url: String, len: usize, max: usize },

    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

/// Proxy settings handed to the transport together with the server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub address: String,
    #[serde(default)]
    pub kind: ProxyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("address", &self.address)
            .field("kind", &self.kind)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A remote endpoint. All strings are built once in [`Server::new`]; nothing
/// can be changed afterwards. Two servers are the same server when their
/// sink URLs match.
#[derive(Debug, Clone)]
pub struct Server {
    host_header: String,
    ping_url: String,
    sink_url: String,
    certificate_path: Option<String>,
    proxy: Option<ProxyConfig>,
}

impl Server {
    pub fn new(
        address: &str,
        port: u16,
        host_name: &str,
        certificate_path: Option<&str>,
        proxy: Option<ProxyConfig>,
    ) -> Result<Self, ServerError> {
        if address.is_empty() {
            return Err(ServerError::EmptyAddress);
        }

        let host_header = format!("Host: {host_name}");
        if host_header.len() > MAX_HOST_HEADER_LEN {
            return Err(ServerError::HostHeaderTooLong {
                host_name: host_name.to_string(),
                len: host_header.len(),
                max: MAX_HOST_HEADER_LEN,
            });
        }

        let base_url = if looks_like_ipv6(address) {
            format!("https://[{address}]:{port}")
        } else {
            format!("https://{address}:{port}")
        };
        let ping_url = checked_url(format!("{base_url}/ping"))?;
        let sink_url = checked_url(format!("{base_url}/sink"))?;

        let certificate_path = certificate_path
            .filter(|path| !path.is_empty())
            .map(|path| {
                if path.len() > MAX_CERTIFICATE_PATH_LEN {
                    tracing::warn!(
                        len = path.len(),
                        max = MAX_CERTIFICATE_PATH_LEN,
                        "Certificate path too long, clipping"
                    );
                }
                clip_to_char_boundary(path, MAX_CERTIFICATE_PATH_LEN).to_string()
            });

        Ok(Self {
            host_header,
            ping_url,
            sink_url,
            certificate_path,
            proxy,
        })
    }

    /// Full header line, e.g. `Host: gateway.example.com`.
    pub fn host_header(&self) -> &str {
        &self.host_header
    }

    pub fn ping_url(&self) -> &str {
        &self.ping_url
    }

    pub fn sink_url(&self) -> &str {
        &self.sink_url
    }

    pub fn certificate_path(&self) -> Option<&str> {
        self.certificate_path.as_deref()
    }

    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }
}

impl PartialEq for Server {
    fn eq(&self, other: &Self) -> bool {
        self.sink_url == other.sink_url
    }
}

impl Eq for Server {}

impl Hash for Server {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sink_url.hash(state);
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sink_url)
    }
}

fn looks_like_ipv6(address: &str) -> bool {
    address.contains(':')
}

fn checked_url(url: String) -> Result<String, ServerError> {
    if url.len() > MAX_URL_LEN {
        return Err(ServerError::UrlTooLong {
            len: url.len(),
            url,
            max: MAX_URL_LEN,
        });
    }
    Url::parse(&url).map_err(|e| ServerError::InvalidUrl {
        url: url.clone(),
        reason: e.to_string(),
    })?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_urls() {
        let server = Server::new("10.0.0.1", 443, "gateway.example.com", None, None).unwrap();
        assert_eq!(server.host_header(), "Host: gateway.example.com");
        assert_eq!(server.ping_url(), "https://10.0.0.1:443/ping");
        assert_eq!(server.sink_url(), "https://10.0.0.1:443/sink");
        assert!(server.certificate_path().is_none());
        assert!(server.proxy().is_none());
    }

    #[test]
    fn test_ipv6_is_bracketed() {
        let server = Server::new(
            "2001:0db8:85a3:0000:0000:8a2e:0370:7334",
            3000,
            "gateway.example.com",
            None,
            None,
        )
        .unwrap();
        assert_eq!(
            server.sink_url(),
            "https://[2001:0db8:85a3:0000:0000:8a2e:0370:7334]:3000/sink"
        );
        assert_eq!(
            server.ping_url(),
            "https://[2001:0db8:85a3:0000:0000:8a2e:0370:7334]:3000/ping"
        );
    }

    #[test]
    fn test_hostname_address() {
        let server = Server::new("sink1.example.com", 8443, "sink1.example.com", None, None)
            .unwrap();
        assert_eq!(server.sink_url(), "https://sink1.example.com:8443/sink");
    }

    #[test]
    fn test_host_header_overflow_is_an_error() {
        let host_name = "h".repeat(MAX_HOST_HEADER_LEN);
        let err = Server::new("10.0.0.1", 443, &host_name, None, None).unwrap_err();
        assert!(matches!(err, ServerError::HostHeaderTooLong { .. }));
    }

    #[test]
    fn test_url_overflow_is_an_error() {
        let address = format!("{}.example.com", "a".repeat(MAX_URL_LEN));
        let err = Server::new(&address, 443, "example.com", None, None).unwrap_err();
        assert!(matches!(err, ServerError::UrlTooLong { .. }));
    }

    #[test]
    fn test_empty_address_is_an_error() {
        assert_eq!(
            Server::new("", 443, "example.com", None, None).unwrap_err(),
            ServerError::EmptyAddress
        );
    }

    #[test]
    fn test_certificate_path_is_clipped() {
        let path = format!("/{}", "c".repeat(MAX_CERTIFICATE_PATH_LEN + 100));
        let server = Server::new("10.0.0.1", 443, "example.com", Some(&path), None).unwrap();
        assert_eq!(
            server.certificate_path().map(str::len),
            Some(MAX_CERTIFICATE_PATH_LEN)
        );
    }

    #[test]
    fn test_identity_is_sink_url() {
        let proxy = ProxyConfig {
            address: "proxy.local:3128".to_string(),
            kind: ProxyKind::Http,
            username: None,
            password: None,
        };
        let a = Server::new("10.0.0.1", 443, "a.example.com", None, None).unwrap();
        let b = Server::new("10.0.0.1", 443, "b.example.com", Some("/etc/ca.pem"), Some(proxy))
            .unwrap();
        let c = Server::new("10.0.0.2", 443, "a.example.com", None, None).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "https://10.0.0.1:443/sink");
    }

    #[test]
    fn test_proxy_password_is_redacted() {
        let proxy = ProxyConfig {
            address: "proxy.local:3128".to_string(),
            kind: ProxyKind::Socks5,
            username: Some("agent".to_string()),
            password: Some("hunter2".to_string()),
        };
        let debug = format!("{proxy:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
