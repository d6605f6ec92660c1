use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use log::debug;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

use crate::endpoint::{Endpoint, Scheme};
use crate::error::Error;

pub enum SocketStream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Uds(UnixStream),
}

impl SocketStream {
    pub async fn connect(endpoint: &Endpoint, tls: Option<&TlsConnector>) -> Result<Self, Error> {
        let connect_err = |source| Error::Connect {
            target: endpoint.to_string(),
            source,
        };

        match endpoint.scheme() {
            Scheme::Http => TcpStream::connect((endpoint.host(), endpoint.port()))
                .await
                .map(Self::Tcp)
                .map_err(connect_err),
            Scheme::Https => {
                let connector = tls.ok_or_else(|| Error::Endpoint {
                    endpoint: endpoint.to_string(),
                    reason: "https endpoint without a tls connector".to_string(),
                })?;
                let server_name = ServerName::try_from(endpoint.host().to_string()).map_err(|err| {
                    Error::Endpoint {
                        endpoint: endpoint.to_string(),
                        reason: err.to_string(),
                    }
                })?;
                let tcp = TcpStream::connect((endpoint.host(), endpoint.port()))
                    .await
                    .map_err(connect_err)?;
                debug!("tls handshake with {}", endpoint.host());
                connector
                    .connect(server_name, tcp)
                    .await
                    .map(|stream| Self::Tls(Box::new(stream)))
                    .map_err(|source| Error::Tls {
                        server: endpoint.host().to_string(),
                        source,
                    })
            }
            Scheme::Unix => match endpoint.socket_path() {
                Some(path) => UnixStream::connect(path).await.map(Self::Uds).map_err(connect_err),
                None => Err(connect_err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "unix endpoint without socket path",
                ))),
            },
        }
    }
}

/// Runs `$call` against whichever socket is inside.
macro_rules! each_socket {
    ($this:expr, $stream:ident => $call:expr) => {
        match $this.get_mut() {
            SocketStream::Tcp($stream) => $call,
            SocketStream::Tls($stream) => $call,
            SocketStream::Uds($stream) => $call,
        }
    };
}

impl AsyncRead for SocketStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        each_socket!(self, s => Pin::new(s).poll_read(cx, buf))
    }
}

impl AsyncWrite for SocketStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        each_socket!(self, s => Pin::new(s).poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        each_socket!(self, s => Pin::new(s).poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        each_socket!(self, s => Pin::new(s).poll_shutdown(cx))
    }
}
