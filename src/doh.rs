//! DNS over HTTPS (DoH) round-tripper
//!
//! RFC 8484: the raw DNS message travels as an HTTP POST body with
//! `Content-Type: application/dns-message`; the response body is the raw
//! DNS response. The HTTP/1.1 exchange is written and parsed directly over
//! a rustls stream so the TCP dial step can rotate endpoints exactly like
//! the DoT transport.

use crate::error::{DnsError, Result};
use crate::transport::{with_deadline, Endpoints, RoundTrip};
use crate::wire;
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};
use url::Url;

/// DoH round-tripper over a rotating endpoint set.
pub struct HttpsTransport {
    endpoints: Arc<Endpoints>,
    connector: TlsConnector,
    server_name: ServerName<'static>,
    host_header: String,
    request_target: String,
}

impl HttpsTransport {
    /// Create a DoH transport from a URI template such as
    /// `https://dns.google/dns-query{?dns}`.
    pub fn new(
        uri: &str,
        endpoints: Arc<Endpoints>,
        tls_config: Option<Arc<rustls::ClientConfig>>,
    ) -> Result<Self> {
        let url = normalize_uri(uri)?;
        Self::from_url(&url, endpoints, tls_config)
    }

    pub(crate) fn from_url(
        url: &Url,
        endpoints: Arc<Endpoints>,
        tls_config: Option<Arc<rustls::ClientConfig>>,
    ) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| DnsError::Config(format!("no host in DoH URI: {url}")))?
            .to_string();

        let host_header = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.clone(),
        };
        let request_target = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        let config = match tls_config {
            Some(config) => config,
            None => {
                let mut roots = rustls::RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                Arc::new(
                    rustls::ClientConfig::builder()
                        .with_root_certificates(roots)
                        .with_no_client_auth(),
                )
            }
        };

        let server_name = ServerName::try_from(host)
            .map_err(|e| DnsError::Config(format!("invalid DoH host: {e}")))?;

        Ok(Self {
            endpoints,
            connector: TlsConnector::from(config),
            server_name,
            host_header,
            request_target,
        })
    }
}

#[async_trait]
impl RoundTrip for HttpsTransport {
    async fn round_trip(&self, deadline: Option<Instant>, request: &[u8]) -> Result<Vec<u8>> {
        let (slot, addr) = self.endpoints.current();
        let tcp = match with_deadline(deadline, TcpStream::connect(addr))
            .await
            .and_then(|dialed| dialed.map_err(DnsError::from))
        {
            Ok(stream) => stream,
            Err(e) => {
                if self.endpoints.advance_from(slot) {
                    debug!(%addr, "dial failed, rotating endpoint");
                }
                return Err(e);
            }
        };

        let mut tls = with_deadline(deadline, self.connector.connect(self.server_name.clone(), tcp))
            .await?
            .map_err(|e| DnsError::Tls(e.to_string()))?;

        let head = format!(
            "POST {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Accept: application/dns-message\r\n\
             Content-Type: application/dns-message\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n",
            self.request_target,
            self.host_header,
            request.len(),
        );

        let mut message = Vec::with_capacity(head.len() + request.len());
        message.extend_from_slice(head.as_bytes());
        message.extend_from_slice(request);
        tls.write_all(&message).await?;
        tls.flush().await?;

        let mut raw = Vec::new();
        match with_deadline(deadline, tls.read_to_end(&mut raw)).await? {
            Ok(_) => {}
            // some servers drop the connection without close_notify
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && !raw.is_empty() => {}
            Err(e) => return Err(e.into()),
        }

        let body = parse_http_response(&raw)?;
        trace!(bytes = body.len(), "DoH response");
        Ok(body)
    }
}

/// Extract the DNS payload from a raw HTTP/1.1 response.
fn parse_http_response(raw: &[u8]) -> Result<Vec<u8>> {
    let header_end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| DnsError::Http("malformed response: no header terminator".to_string()))?
        + 4;
    let head = std::str::from_utf8(&raw[..header_end - 4])
        .map_err(|_| DnsError::Http("malformed response header".to_string()))?;

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let _version = parts.next();
    let status: u16 = parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| DnsError::Http(format!("malformed status line: {status_line}")))?;
    if status != 200 {
        let reason = parts.next().unwrap_or("").trim();
        return Err(DnsError::Http(if reason.is_empty() {
            status.to_string()
        } else {
            format!("{status} {reason}")
        }));
    }

    let mut content_length = None;
    let mut chunked = false;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<usize>().ok();
            } else if name.eq_ignore_ascii_case("transfer-encoding") {
                chunked = value.trim().eq_ignore_ascii_case("chunked");
            }
        }
    }

    let body = &raw[header_end..];
    let body = if chunked {
        decode_chunked(body)?
    } else {
        match content_length {
            Some(length) if body.len() < length => return Err(DnsError::UnexpectedEof),
            Some(length) => body[..length].to_vec(),
            None => body.to_vec(),
        }
    };

    if body.len() > wire::MAX_MESSAGE_LEN {
        return Err(DnsError::ShortBuffer);
    }
    Ok(body)
}

fn decode_chunked(mut body: &[u8]) -> Result<Vec<u8>> {
    let mut decoded = Vec::new();
    loop {
        let line_end = body
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or(DnsError::UnexpectedEof)?;
        let size_str = std::str::from_utf8(&body[..line_end])
            .map_err(|_| DnsError::Http("malformed chunk size".to_string()))?;
        let size = usize::from_str_radix(size_str.trim(), 16)
            .map_err(|_| DnsError::Http("malformed chunk size".to_string()))?;
        body = &body[line_end + 2..];
        if size == 0 {
            return Ok(decoded);
        }
        if body.len() < size + 2 {
            return Err(DnsError::UnexpectedEof);
        }
        decoded.extend_from_slice(&body[..size]);
        body = &body[size + 2..];
    }
}

/// Strip the RFC 6570 `{?dns}` expansion from a DoH URI template.
///
/// POST bodies carry the message, so the expansion is elided rather than
/// expanded. Unbalanced or nested braces are a construction error.
pub fn parse_uri_template(uri: &str) -> Result<String> {
    let mut stripped = String::with_capacity(uri.len());
    let mut in_expansion = false;
    for c in uri.chars() {
        match c {
            '{' => {
                if in_expansion {
                    return Err(DnsError::Config(format!("invalid URI template: {uri}")));
                }
                in_expansion = true;
            }
            '}' => {
                if !in_expansion {
                    return Err(DnsError::Config(format!("invalid URI template: {uri}")));
                }
                in_expansion = false;
            }
            _ if in_expansion => {}
            c => stripped.push(c),
        }
    }
    if in_expansion {
        return Err(DnsError::Config(format!("invalid URI template: {uri}")));
    }
    Ok(stripped)
}

/// Normalize a DoH URI template into a plain HTTPS URL.
pub(crate) fn normalize_uri(uri: &str) -> Result<Url> {
    let stripped = parse_uri_template(uri)?;
    let url =
        Url::parse(&stripped).map_err(|e| DnsError::Config(format!("invalid DoH URI: {e}")))?;
    if url.scheme() != "https" {
        return Err(DnsError::Config(format!(
            "DoH URI must use https: {stripped}"
        )));
    }
    Ok(url)
}
