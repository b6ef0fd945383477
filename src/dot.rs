//! DNS over TLS (DoT) round-tripper
//!
//! RFC 7858: length-framed DNS messages over a TLS 1.2+ session on the
//! 853 endpoint. One connection per exchange; session resumption keeps
//! repeat handshakes cheap.

use crate::error::{DnsError, Result};
use crate::transport::{with_deadline, Endpoints, RoundTrip};
use crate::wire;
use async_trait::async_trait;
use rustls::client::{ClientSessionMemoryCache, Resumption};
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};

/// DoT round-tripper over a rotating endpoint set.
pub struct TlsTransport {
    endpoints: Arc<Endpoints>,
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl TlsTransport {
    /// Create a DoT transport authenticating the server as `server_name`.
    pub fn new(
        server_name: &str,
        endpoints: Arc<Endpoints>,
        tls_config: Option<Arc<rustls::ClientConfig>>,
    ) -> Result<Self> {
        let config = match tls_config {
            Some(config) => config,
            None => {
                let mut roots = rustls::RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

                let mut config = rustls::ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth();
                config.resumption = Resumption::store(Arc::new(ClientSessionMemoryCache::new(
                    endpoints.len().max(1),
                )));
                Arc::new(config)
            }
        };

        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|e| DnsError::Config(format!("invalid TLS server name: {e}")))?;

        Ok(Self {
            endpoints,
            connector: TlsConnector::from(config),
            server_name,
        })
    }
}

#[async_trait]
impl RoundTrip for TlsTransport {
    async fn round_trip(&self, deadline: Option<Instant>, request: &[u8]) -> Result<Vec<u8>> {
        if request.len() > wire::MAX_MESSAGE_LEN {
            return Err(DnsError::Protocol("query exceeds frame limit".to_string()));
        }

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

        // handshake failures surface unchanged and keep the endpoint: a
        // certificate or policy problem is not flakiness
        let mut tls = with_deadline(deadline, self.connector.connect(self.server_name.clone(), tcp))
            .await?
            .map_err(|e| DnsError::Tls(e.to_string()))?;

        // single write per RFC 7766 section 8; writes carry no deadline
        let framed = wire::frame_stream(request);
        tls.write_all(&framed).await?;
        tls.flush().await?;

        let mut len_buf = [0u8; 2];
        with_deadline(deadline, tls.read_exact(&mut len_buf)).await??;
        let size = usize::from(u16::from_be_bytes(len_buf));

        let mut response = vec![0u8; size];
        with_deadline(deadline, tls.read_exact(&mut response)).await??;
        trace!(bytes = response.len(), "DoT response");
        Ok(response)
    }
}
