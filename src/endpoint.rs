use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use http::uri::{PathAndQuery, Uri};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
    Unix,
}

/// The fixed base address a dispatcher is bound to.
///
/// `http://` and `https://` endpoints go over TCP, `unix:///path` speaks
/// HTTP/1.1 over a Unix-domain socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    raw: String,
    scheme: Scheme,
    host: String,
    port: u16,
    socket_path: Option<PathBuf>,
    base_path: String,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let invalid = |reason: &str| Error::Endpoint {
            endpoint: raw.to_string(),
            reason: reason.to_string(),
        };

        if let Some(path) = raw.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid("missing socket path"));
            }
            return Ok(Endpoint {
                raw: raw.to_string(),
                scheme: Scheme::Unix,
                host: "localhost".to_string(),
                port: 0,
                socket_path: Some(PathBuf::from(path)),
                base_path: String::new(),
            });
        }

        let uri: Uri = raw.parse().map_err(|err: http::uri::InvalidUri| invalid(&err.to_string()))?;
        let (scheme, default_port) = match uri.scheme_str() {
            Some("http") => (Scheme::Http, 80),
            Some("https") => (Scheme::Https, 443),
            Some(other) => return Err(invalid(&format!("unsupported scheme `{}`", other))),
            None => return Err(invalid("missing scheme")),
        };
        let host = match uri.host() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(invalid("missing host")),
        };
        if uri.query().is_some() {
            return Err(invalid("endpoint must not carry a query"));
        }

        Ok(Endpoint {
            raw: raw.to_string(),
            scheme,
            host,
            port: uri.port_u16().unwrap_or(default_port),
            socket_path: None,
            base_path: uri.path().trim_end_matches('/').to_string(),
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host name for DNS and TLS, without IPv6 brackets.
    pub fn host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_path(&self) -> Option<&PathBuf> {
        self.socket_path.as_ref()
    }

    /// Value of the `Host` request header.
    pub fn authority(&self) -> String {
        match (self.scheme, self.port) {
            (Scheme::Unix, _) | (Scheme::Http, 80) | (Scheme::Https, 443) => self.host.clone(),
            _ => format!("{}:{}", self.host, self.port),
        }
    }

    /// Prefixes the endpoint's base path onto a request target.
    pub fn resolve(&self, target: &PathAndQuery) -> Result<PathAndQuery, Error> {
        if self.base_path.is_empty() {
            return Ok(target.clone());
        }
        let joined = format!("{}{}", self.base_path, target);
        PathAndQuery::try_from(joined.as_str()).map_err(|err| Error::Encoding {
            input: joined.clone(),
            reason: err.to_string(),
        })
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.scheme {
            Scheme::Unix => write!(f, "{}", self.raw),
            Scheme::Http => write!(f, "tcp://{}:{}", self.host, self.port),
            Scheme::Https => write!(f, "tls://{}:{}", self.host, self.port),
        }
    }
}
