use std::io;
use std::path::PathBuf;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid endpoint `{endpoint}`: {reason}")]
    Endpoint { endpoint: String, reason: String },

    #[error("cannot encode `{input}` as a request uri: {reason}")]
    Encoding { input: String, reason: String },

    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("tls handshake with {server} failed: {source}")]
    Tls {
        server: String,
        #[source]
        source: io::Error,
    },

    #[error("tls configuration: {0}")]
    TlsConfig(#[from] tokio_rustls::rustls::Error),

    #[error("no usable certificates in {}: {reason}", .path.display())]
    Certificates { path: PathBuf, reason: String },

    #[error("cannot build request: {0}")]
    Request(#[from] http::Error),

    #[error("transport failure: {0}")]
    Transport(#[source] hyper::Error),

    #[error("malformed response: {0}")]
    Protocol(#[source] hyper::Error),

    #[error("continuation failed: {0}")]
    Continuation(#[source] BoxError),

    #[error("continuation panicked: {0}")]
    ContinuationPanicked(String),

    #[error("request {id} panicked in transit: {message}")]
    ExchangePanicked { id: u64, message: String },

    #[error("request {0} was aborted before completion")]
    Aborted(u64),

    #[error("cannot read config {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse config {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to start runtime: {0}")]
    Runtime(#[source] io::Error),
}

impl Error {
    /// Connection, TLS and HTTP transport failures.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Connect { .. } | Error::Tls { .. } | Error::Transport(_)
        )
    }
}

impl From<hyper::Error> for Error {
    fn from(err: hyper::Error) -> Self {
        if err.is_parse() || err.is_parse_status() || err.is_parse_too_large() {
            Error::Protocol(err)
        } else {
            Error::Transport(err)
        }
    }
}
