//! TCP + optional HTTP CONNECT proxy + TLS + the `SSTP_DUPLEX_POST` upgrade
//! (spec.md §4.2). Once connected, the transport is split into a
//! single-reader [`TransportReader`] (owned by the demultiplexer task) and a
//! shareable, mutex-serialised [`TransportWriter`] (cloned into every task
//! that needs to send a control frame).

mod handshake;
mod proxy;

use crate::config::Config;
use crate::error::TransportError;
use crate::external::TrustStore;
use std::sync::Arc;
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::client::TlsStream;

type Stream = TlsStream<TcpStream>;

pub struct TransportReader {
    inner: ReadHalf<Stream>,
}

impl TransportReader {
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(self.inner.read(buf).await?)
    }
}

pub struct TransportWriter {
    inner: Mutex<WriteHalf<Stream>>,
}

impl TransportWriter {
    /// Sends `buf` in full, serialised against every other writer so that
    /// one SSTP packet's bytes never interleave with another's
    /// (spec.md §4.2, §5).
    pub async fn send(&self, buf: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.inner.lock().await;
        guard.write_all(buf).await?;
        Ok(())
    }
}

/// Establishes the full chain: TCP (direct or via proxy CONNECT) → TLS →
/// `SSTP_DUPLEX_POST` upgrade. Returns the split reader/writer halves plus
/// the negotiated peer leaf certificate (DER), needed later for
/// crypto-binding.
pub async fn connect(
    config: &Config,
    trust_store: Option<&dyn TrustStore>,
    guid: &str,
) -> Result<(TransportReader, Arc<TransportWriter>, Vec<u8>), TransportError> {
    let tcp = match &config.proxy {
        Some(proxy) => proxy::connect_via_proxy(proxy, &config.hostname, config.port).await?,
        None => TcpStream::connect((config.hostname.as_str(), config.port)).await?,
    };
    tcp.set_nodelay(true).ok();

    let (tls, leaf_cert) = handshake::connect_tls(tcp, config, trust_store).await?;
    let (read_half, write_half) = split(tls);
    let mut reader = TransportReader { inner: read_half };
    let writer = Arc::new(TransportWriter {
        inner: Mutex::new(write_half),
    });

    handshake::duplex_post_upgrade(&mut reader, &writer, &config.hostname, guid).await?;

    Ok((reader, writer, leaf_cert))
}

async fn read_until_crlfcrlf<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(TransportError::MalformedHttp);
        }
        buf.push(byte[0]);
        if buf.len() >= 4 && &buf[buf.len() - 4..] == b"\r\n\r\n" {
            return Ok(buf);
        }
        if buf.len() > 64 * 1024 {
            return Err(TransportError::MalformedHttp);
        }
    }
}

fn status_code(response: &[u8]) -> Result<u16, TransportError> {
    let text = std::str::from_utf8(response).map_err(|_| TransportError::MalformedHttp)?;
    let first_line = text.lines().next().ok_or(TransportError::MalformedHttp)?;
    first_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or(TransportError::MalformedHttp)
}

pub(crate) use read_until_crlfcrlf as read_http_headers;
pub(crate) use status_code as http_status_code;
