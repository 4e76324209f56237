//! TCP / TLS transport and SSLRequest negotiation.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

#[cfg(feature = "tokio-tls")]
use tokio_native_tls::TlsStream;

use crate::error::{Error, Result};
use crate::opts::{Opts, SslMode};

pub enum Stream {
    Tcp(TcpStream),
    #[cfg(feature = "tokio-tls")]
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    pub fn is_tcp_loopback(&self) -> bool {
        match self {
            Self::Tcp(s) => is_loopback(s),
            #[cfg(feature = "tokio-tls")]
            Self::Tls(s) => is_loopback(
                s.get_ref() // &native_tls::TlsStream<AllowStd<TcpStream>>
                    .get_ref() // &AllowStd<TcpStream>
                    .get_ref(), // &TcpStream
            ),
        }
    }
}

fn is_loopback(stream: &TcpStream) -> bool {
    stream
        .peer_addr()
        .map(|addr| addr.ip().is_loopback())
        .unwrap_or(false)
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Open the transport described by `opts`.
///
/// Returns the stream and, for TLS connections, the SHA-256 hash of the
/// server's leaf certificate used for channel binding.
pub async fn connect(opts: &Opts) -> Result<(Stream, Option<Vec<u8>>)> {
    if opts.host.is_empty() {
        return Err(Error::InvalidUsage("host is empty".into()));
    }
    let tcp = TcpStream::connect((opts.host.as_str(), opts.port)).await?;
    tcp.set_nodelay(true)?;

    match opts.ssl_mode {
        SslMode::Disable => Ok((Stream::Tcp(tcp), None)),
        #[cfg(not(feature = "tokio-tls"))]
        SslMode::Prefer => Ok((Stream::Tcp(tcp), None)),
        #[cfg(not(feature = "tokio-tls"))]
        SslMode::Require => Err(Error::InvalidUsage(
            "sslmode=require needs the tokio-tls feature".into(),
        )),
        #[cfg(feature = "tokio-tls")]
        SslMode::Prefer | SslMode::Require => negotiate_tls(tcp, opts).await,
    }
}

#[cfg(feature = "tokio-tls")]
async fn negotiate_tls(mut tcp: TcpStream, opts: &Opts) -> Result<(Stream, Option<Vec<u8>>)> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::protocol::frontend::write_ssl_request;

    let mut buf = Vec::new();
    write_ssl_request(&mut buf);
    tcp.write_all(&buf).await?;
    tcp.flush().await?;

    match tcp.read_u8().await? {
        b'S' => {
            let (tls, hash) = upgrade_to_tls(tcp, &opts.host).await?;
            Ok((Stream::Tls(Box::new(tls)), Some(hash)))
        }
        b'N' if opts.ssl_mode == SslMode::Require => Err(Error::Auth(
            "SSL required but not supported by server".into(),
        )),
        b'N' => {
            tracing::debug!("server declined SSL, continuing unencrypted");
            Ok((Stream::Tcp(tcp), None))
        }
        other => Err(Error::Protocol(format!(
            "Unexpected SSL response: {}",
            other
        ))),
    }
}

#[cfg(feature = "tokio-tls")]
async fn upgrade_to_tls(tcp: TcpStream, host: &str) -> Result<(TlsStream<TcpStream>, Vec<u8>)> {
    use sha2::{Digest, Sha256};

    // Local servers usually run with self-signed certificates.
    let loopback = is_loopback(&tcp);
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(loopback)
        .danger_accept_invalid_hostnames(loopback)
        .build()?;
    let tls = tokio_native_tls::TlsConnector::from(connector)
        .connect(host, tcp)
        .await?;

    let certificate = tls
        .get_ref()
        .peer_certificate()?
        .ok_or_else(|| Error::Protocol("server presented no certificate".into()))?;
    let hash = Sha256::digest(certificate.to_der()?).to_vec();
    Ok((tls, hash))
}
