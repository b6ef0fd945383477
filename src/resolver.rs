//! Host-resolver convenience layer
//!
//! The standard library resolver is not pluggable, so instead of injecting
//! a dialer into it the crate drives its own framing adapter and formats
//! final host records here. `connect` hands out the raw adapter for hosts
//! that want the byte-level surface.

use crate::cache::MessageCache;
use crate::config::{CacheOptions, DohOptions, DotOptions};
use crate::conn::{DnsConn, Framing};
use crate::doh::{normalize_uri, HttpsTransport};
use crate::dot::TlsTransport;
use crate::error::{DnsError, Result};
use crate::transport::{CachedTransport, Endpoints, RoundTrip};
use crate::wire;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const DOT_PORT: u16 = 853;
const DOH_PORT: u16 = 443;

/// Stub resolver over an encrypted transport.
///
/// Construct one with [`StubResolver::dot`] or [`StubResolver::doh`], or
/// bring any [`RoundTrip`] back-end with [`StubResolver::from_transport`].
pub struct StubResolver {
    transport: Arc<dyn RoundTrip>,
    timeout: Duration,
}

impl StubResolver {
    /// DNS over TLS resolver. `server` is an IP, a host name, or
    /// `host:port`; the host name is resolved once, here, unless
    /// `options.addresses` overrides the endpoints.
    pub async fn dot(server: &str, options: DotOptions) -> Result<Self> {
        let (host, port) = split_host_port(server, DOT_PORT);
        let addrs = resolve_endpoints(&host, port, &options.addresses).await?;
        let endpoints = Arc::new(Endpoints::new(addrs)?);
        debug!(server = %host, endpoints = endpoints.len(), "DoT resolver ready");

        let transport = Arc::new(TlsTransport::new(&host, endpoints, options.tls_config)?);
        Ok(Self {
            transport: wrap_cache(transport, options.cache),
            timeout: options.timeout,
        })
    }

    /// DNS over HTTPS resolver for a URI template such as
    /// `https://dns.google/dns-query{?dns}`.
    pub async fn doh(uri: &str, options: DohOptions) -> Result<Self> {
        let url = normalize_uri(uri)?;
        let host = url
            .host_str()
            .ok_or_else(|| DnsError::Config(format!("no host in DoH URI: {uri}")))?
            .to_string();
        let port = url.port().unwrap_or(DOH_PORT);
        let addrs = resolve_endpoints(&host, port, &options.addresses).await?;
        let endpoints = Arc::new(Endpoints::new(addrs)?);
        debug!(%url, endpoints = endpoints.len(), "DoH resolver ready");

        let transport = Arc::new(HttpsTransport::from_url(&url, endpoints, options.tls_config)?);
        Ok(Self {
            transport: wrap_cache(transport, options.cache),
            timeout: options.timeout,
        })
    }

    /// Resolver over a caller-supplied back-end.
    pub fn from_transport(transport: Arc<dyn RoundTrip>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Open a packet-framed virtual connection to the transport.
    pub fn connect(&self) -> DnsConn {
        DnsConn::new(self.transport.clone(), Framing::Packet)
    }

    /// Open a connection for hosts that frame with a 2-byte length prefix.
    pub fn connect_stream(&self) -> DnsConn {
        DnsConn::new(self.transport.clone(), Framing::Stream)
    }

    /// Exchange one serialized query for one serialized response.
    pub async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>> {
        let conn = self.connect();
        conn.set_deadline(Some(Instant::now() + self.timeout));
        conn.write(request);

        let mut buf = vec![0u8; wire::MAX_MESSAGE_LEN];
        let n = conn.read(&mut buf).await?;
        if n == 0 {
            return Err(DnsError::UnexpectedEof);
        }
        buf.truncate(n);
        Ok(buf)
    }

    /// Resolve a host name to its A and AAAA records.
    ///
    /// IPv4 addresses sort first. NXDOMAIN surfaces as
    /// [`DnsError::NameError`] once both queries agree there is no such
    /// name.
    pub async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>> {
        let name = Name::from_str(host)
            .map_err(|e| DnsError::NameError(format!("invalid name {host}: {e}")))?;

        let mut ips = Vec::new();
        let mut name_error = false;
        let mut last_error = None;
        for record_type in [RecordType::A, RecordType::AAAA] {
            match self.query(&name, record_type).await {
                Ok(response) => {
                    if response.response_code() == ResponseCode::NXDomain {
                        name_error = true;
                        continue;
                    }
                    for answer in response.answers() {
                        match answer.data() {
                            RData::A(a) => ips.push(IpAddr::V4(a.0)),
                            RData::AAAA(aaaa) => ips.push(IpAddr::V6(aaaa.0)),
                            _ => {}
                        }
                    }
                }
                Err(e) => last_error = Some(e),
            }
        }

        if ips.is_empty() {
            if name_error {
                return Err(DnsError::NameError(host.to_string()));
            }
            if let Some(e) = last_error {
                return Err(e);
            }
            return Err(DnsError::QueryFailed(format!("no addresses for {host}")));
        }

        ips.sort_by_key(|ip| match ip {
            IpAddr::V4(_) => 0,
            IpAddr::V6(_) => 1,
        });
        debug!(%host, count = ips.len(), "resolved");
        Ok(ips)
    }

    async fn query(&self, name: &Name, record_type: RecordType) -> Result<Message> {
        let mut message = Message::new();
        message.set_id(rand::random());
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);
        message.add_query(Query::query(name.clone(), record_type));

        let request = message.to_bytes()?;
        let response = self.exchange(&request).await?;
        Ok(Message::from_bytes(&response)?)
    }
}

fn wrap_cache(inner: Arc<dyn RoundTrip>, cache: Option<CacheOptions>) -> Arc<dyn RoundTrip> {
    match cache {
        Some(options) => Arc::new(CachedTransport::new(
            inner,
            Arc::new(MessageCache::new(options)),
        )),
        None => inner,
    }
}

/// Split `host:port`, defaulting the port. Bare IPv6 addresses pass
/// through whole.
fn split_host_port(server: &str, default_port: u16) -> (String, u16) {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return (addr.ip().to_string(), addr.port());
    }
    if let Some((host, port)) = server.rsplit_once(':') {
        if !host.contains(':') {
            if let Ok(port) = port.parse::<u16>() {
                return (host.to_string(), port);
            }
        }
    }
    (server.to_string(), default_port)
}

/// Produce the endpoint list for a resolver: either the caller's address
/// overrides, or every address the server name resolves to.
async fn resolve_endpoints(host: &str, port: u16, overrides: &[String]) -> Result<Vec<SocketAddr>> {
    if overrides.is_empty() {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
        if addrs.is_empty() {
            return Err(DnsError::Config(format!("no addresses for resolver {host}")));
        }
        return Ok(addrs);
    }

    let mut addrs = Vec::with_capacity(overrides.len());
    for address in overrides {
        if let Ok(ip) = address.parse::<IpAddr>() {
            addrs.push(SocketAddr::new(ip, port));
        } else if let Ok(addr) = address.parse::<SocketAddr>() {
            addrs.push(addr);
        } else {
            return Err(DnsError::Config(format!(
                "invalid resolver address: {address}"
            )));
        }
    }
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn host_port_splitting() {
        assert_eq!(split_host_port("dns.google", 853), ("dns.google".into(), 853));
        assert_eq!(
            split_host_port("dns.google:8853", 853),
            ("dns.google".into(), 8853)
        );
        assert_eq!(split_host_port("8.8.8.8", 853), ("8.8.8.8".into(), 853));
        assert_eq!(split_host_port("8.8.8.8:53", 853), ("8.8.8.8".into(), 53));
        assert_eq!(
            split_host_port("2606:4700:4700::1111", 853),
            ("2606:4700:4700::1111".into(), 853)
        );
        assert_eq!(
            split_host_port("[2606:4700:4700::1111]:8853", 853),
            ("2606:4700:4700::1111".into(), 8853)
        );
    }

    #[tokio::test]
    async fn address_overrides_join_the_server_port() {
        let addrs = resolve_endpoints(
            "dns.example",
            853,
            &["9.9.9.9".to_string(), "9.9.9.10:8853".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(
            addrs,
            vec![
                SocketAddr::new(IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)), 853),
                SocketAddr::new(IpAddr::V4(Ipv4Addr::new(9, 9, 9, 10)), 8853),
            ]
        );
    }

    #[tokio::test]
    async fn invalid_override_is_a_config_error() {
        assert!(matches!(
            resolve_endpoints("dns.example", 853, &["not-an-ip".to_string()]).await,
            Err(DnsError::Config(_))
        ));
    }

    #[tokio::test]
    async fn doh_construction_rejects_bad_templates() {
        assert!(matches!(
            StubResolver::doh("https://x/{?dns", DohOptions::default()).await,
            Err(DnsError::Config(_))
        ));
    }

    #[tokio::test]
    async fn dot_construction_with_ip_needs_no_lookup() {
        let resolver = StubResolver::dot("9.9.9.9", DotOptions::default()).await;
        assert!(resolver.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn live_doh_lookup() {
        let resolver = StubResolver::doh(
            "https://1.1.1.1/dns-query",
            DohOptions {
                cache: Some(CacheOptions::default()),
                ..DohOptions::default()
            },
        )
        .await
        .unwrap();

        let mut ips = resolver.lookup_ip("one.one.one.one").await.unwrap();
        ips.sort();
        let mut expected: Vec<IpAddr> = vec![
            "1.1.1.1".parse().unwrap(),
            "1.0.0.1".parse().unwrap(),
            "2606:4700:4700::1111".parse().unwrap(),
            "2606:4700:4700::1001".parse().unwrap(),
        ];
        expected.sort();
        assert_eq!(ips, expected);
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn live_dot_lookup() {
        let resolver = StubResolver::dot("dns.google", DotOptions::default())
            .await
            .unwrap();
        assert!(!resolver.lookup_ip("google.com").await.unwrap().is_empty());
    }
}
