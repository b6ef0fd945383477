//! Opportunistic TLS upgrade for plaintext DNS dials
//!
//! A dial to port 53 is first attempted as TLS on port 853. The session is
//! deliberately unauthenticated: the plaintext baseline carries no
//! authentication either, so the upgrade only needs to resist passive
//! eavesdropping. Peers that refuse 853 land in a small ring and are not
//! retried until rotation pushes them out.

use crate::error::{DnsError, Result};
use crate::transport::with_deadline;
use parking_lot::Mutex;
use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Any bidirectional byte stream the dialer can hand back.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Conn for T {}

/// The inner plaintext dial the upgrade wraps.
pub type DialFn = Arc<
    dyn Fn(String, u16) -> Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send>>
        + Send
        + Sync,
>;

const DNS_PORT: u16 = 53;
const UPGRADE_PORT: u16 = 853;

/// Minimum deadline budget left before an upgrade attempt is worth the
/// extra round trips.
const MIN_UPGRADE_BUDGET: Duration = Duration::from_secs(2);

const RING_SLOTS: usize = 4;

#[derive(Default)]
struct BadServers {
    next: usize,
    list: [Option<String>; RING_SLOTS],
}

static BAD_SERVERS: OnceLock<Mutex<BadServers>> = OnceLock::new();

fn bad_servers() -> &'static Mutex<BadServers> {
    BAD_SERVERS.get_or_init(|| Mutex::new(BadServers::default()))
}

fn is_bad_server(address: &str) -> bool {
    bad_servers()
        .lock()
        .list
        .iter()
        .any(|seen| seen.as_deref() == Some(address))
}

fn add_bad_server(address: String) {
    let mut ring = bad_servers().lock();
    if ring.list.iter().any(|seen| seen.as_deref() == Some(address.as_str())) {
        return;
    }
    let slot = ring.next;
    ring.list[slot] = Some(address);
    ring.next = (slot + 1) % RING_SLOTS;
}

/// Dialer that transparently upgrades port-53 dials to TLS on 853.
pub struct OpportunisticDialer {
    dial: DialFn,
    connector: TlsConnector,
}

impl OpportunisticDialer {
    /// Upgrade dialer over plain `TcpStream::connect`.
    pub fn new() -> Self {
        Self::with_dialer(Arc::new(
            |host: String, port: u16| -> Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send>> {
                Box::pin(async move { TcpStream::connect((host.as_str(), port)).await })
            },
        ))
    }

    /// Upgrade dialer over a caller-supplied plaintext dial.
    pub fn with_dialer(dial: DialFn) -> Self {
        // opportunistic sessions accept any certificate
        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth();
        Self {
            dial,
            connector: TlsConnector::from(Arc::new(config)),
        }
    }

    /// Dial `host:port`, upgrading to TLS when the port is 53, the peer is
    /// not ringed, and the deadline leaves room to retry on failure.
    pub async fn dial(
        &self,
        host: &str,
        port: u16,
        deadline: Option<Instant>,
    ) -> Result<Box<dyn Conn>> {
        let address = format!("{host}:{port}");
        if port == DNS_PORT && !is_bad_server(&address) && has_upgrade_budget(deadline) {
            match self.try_upgrade(host, deadline).await {
                Ok(conn) => {
                    debug!(%address, "upgraded plaintext DNS dial to TLS");
                    return Ok(conn);
                }
                Err(e) => {
                    debug!(%address, error = %e, "opportunistic TLS failed, falling back");
                    add_bad_server(address);
                }
            }
        }

        let tcp = with_deadline(deadline, (self.dial)(host.to_string(), port)).await??;
        Ok(Box::new(tcp))
    }

    async fn try_upgrade(&self, host: &str, deadline: Option<Instant>) -> Result<Box<dyn Conn>> {
        let tcp = with_deadline(deadline, (self.dial)(host.to_string(), UPGRADE_PORT)).await??;
        let name = ServerName::try_from(host.to_string())
            .map_err(|e| DnsError::Tls(format!("invalid server name: {e}")))?;
        let tls = with_deadline(deadline, self.connector.connect(name, tcp))
            .await?
            .map_err(|e| DnsError::Tls(e.to_string()))?;
        Ok(Box::new(tls))
    }
}

impl Default for OpportunisticDialer {
    fn default() -> Self {
        Self::new()
    }
}

fn has_upgrade_budget(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|at| at > Instant::now() + MIN_UPGRADE_BUDGET)
}

/// Verifier for opportunistic sessions: every certificate passes.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}
