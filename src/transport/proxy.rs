//! The literal HTTP CONNECT exchange through a forward proxy (spec.md §4.2).

use super::{http_status_code, read_http_headers};
use crate::config::ProxyConfig;
use crate::error::TransportError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

pub async fn connect_via_proxy(
    proxy: &ProxyConfig,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream, TransportError> {
    let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port)).await?;

    let mut request = format!(
        "CONNECT {target_host}:{target_port} HTTP/1.1\r\nHost: {target_host}:{target_port}\r\nSSTPVERSION: 1.0\r\n"
    );
    if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
        let credentials = BASE64.encode(format!("{user}:{pass}"));
        request.push_str(&format!("Proxy-Authorization: Basic {credentials}\r\n"));
    }
    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).await?;

    let response = read_http_headers(&mut stream).await?;
    match http_status_code(&response)? {
        200 => Ok(stream),
        403 => Err(TransportError::ProxyRejected(403)),
        other => Err(TransportError::ProxyRejected(other)),
    }
}
