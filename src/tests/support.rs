//! Shared test fixtures: a scriptable round-tripper and raw message
//! builders.

use crate::error::Result;
use crate::transport::RoundTrip;
use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::SOA;
use hickory_proto::rr::{Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

type Handler = Box<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// Round-tripper backed by a closure, counting every exchange.
pub struct MockTransport {
    calls: AtomicUsize,
    delay: Option<Duration>,
    handler: Handler,
}

impl MockTransport {
    pub fn new(handler: impl Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync + 'static) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: None,
            handler: Box::new(handler),
        }
    }

    pub fn delayed(
        delay: Duration,
        handler: impl Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(handler)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoundTrip for MockTransport {
    async fn round_trip(&self, _deadline: Option<Instant>, request: &[u8]) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(request)
    }
}

/// Mock that answers every query with itself, QR bit flipped.
pub fn answering_mock() -> Arc<MockTransport> {
    Arc::new(MockTransport::new(|request: &[u8]| {
        let mut response = request.to_vec();
        response[2] |= 0x80;
        Ok(response)
    }))
}

/// Serialized query for `name`, A record, recursion desired.
pub fn query_message(name: &str) -> Vec<u8> {
    let mut message = Message::new();
    message.set_id(rand::random());
    message.set_message_type(MessageType::Query);
    message.set_op_code(OpCode::Query);
    message.set_recursion_desired(true);
    message.add_query(hickory_proto::op::Query::query(
        Name::from_str(name).unwrap(),
        RecordType::A,
    ));
    message.to_bytes().unwrap()
}

/// Response to `request` answering with `ips`, filtered to the record
/// type the request asked for.
pub fn answer_response(request: &[u8], ips: &[IpAddr], ttl: u32) -> Vec<u8> {
    let request = Message::from_bytes(request).unwrap();
    let query = request.queries()[0].clone();

    let mut response = Message::new();
    response.set_id(request.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(OpCode::Query);
    response.set_recursion_desired(true);
    response.set_recursion_available(true);
    response.add_query(query.clone());

    for ip in ips {
        let rdata = match ip {
            IpAddr::V4(v4) if query.query_type() == RecordType::A => RData::A((*v4).into()),
            IpAddr::V6(v6) if query.query_type() == RecordType::AAAA => {
                RData::AAAA((*v6).into())
            }
            _ => continue,
        };
        response.add_answer(Record::from_rdata(query.name().clone(), ttl, rdata));
    }
    response.to_bytes().unwrap()
}

/// NXDOMAIN response to `request` with an SOA record in the authority
/// section, the shape negative caching feeds on.
pub fn nxdomain_response(request: &[u8], soa_ttl: u32) -> Vec<u8> {
    let request = Message::from_bytes(request).unwrap();
    let query = request.queries()[0].clone();

    let mut response = Message::new();
    response.set_id(request.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(OpCode::Query);
    response.set_recursion_desired(true);
    response.set_recursion_available(true);
    response.set_response_code(ResponseCode::NXDomain);
    response.add_query(query.clone());

    let zone = Name::from_str("test.").unwrap();
    let soa = SOA::new(
        Name::from_str("ns1.test.").unwrap(),
        Name::from_str("hostmaster.test.").unwrap(),
        2024_01_01,
        7200,
        3600,
        1_209_600,
        soa_ttl,
    );
    response.add_name_server(Record::from_rdata(zone, soa_ttl, RData::SOA(soa)));
    response.to_bytes().unwrap()
}

/// Hand-rolled query bytes: one A/IN question for `<label>.test`.
///
/// The raw builders exist so codec and cache tests control every byte,
/// with no serializer in between.
pub fn raw_query(id: u16, label: &[u8]) -> Vec<u8> {
    assert!(label.len() < 0x40);
    let mut msg = Vec::with_capacity(32 + label.len());
    msg.extend_from_slice(&id.to_be_bytes());
    msg.extend_from_slice(&[0x01, 0x00]); // RD
    msg.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
    msg.extend_from_slice(&[0x00; 6]);
    push_question(&mut msg, label);
    msg
}

/// Hand-rolled response bytes: the `raw_query` question plus one A answer
/// per TTL, each pointing at the question name.
pub fn raw_response(id: u16, label: &[u8], ttls: &[u32]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(48 + label.len() + 16 * ttls.len());
    msg.extend_from_slice(&id.to_be_bytes());
    msg.extend_from_slice(&[0x81, 0x80]); // QR, RD, RA
    msg.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
    msg.extend_from_slice(&(ttls.len() as u16).to_be_bytes()); // ANCOUNT
    msg.extend_from_slice(&[0x00; 4]);
    push_question(&mut msg, label);
    for (i, ttl) in ttls.iter().enumerate() {
        msg.extend_from_slice(&[0xc0, 0x0c]); // name pointer to the question
        msg.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // A, IN
        msg.extend_from_slice(&ttl.to_be_bytes());
        msg.extend_from_slice(&[0x00, 0x04]); // RDLENGTH
        msg.extend_from_slice(&[192, 0, 2, i as u8]);
    }
    msg
}

/// Hand-rolled NXDOMAIN: the question plus one SOA authority record.
pub fn raw_negative_response(id: u16, label: &[u8], soa_ttl: u32) -> Vec<u8> {
    let mut msg = Vec::with_capacity(64 + label.len());
    msg.extend_from_slice(&id.to_be_bytes());
    msg.extend_from_slice(&[0x81, 0x83]); // QR, RD, RA, RCODE=3
    msg.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
    msg.extend_from_slice(&[0x00, 0x00]); // ANCOUNT
    msg.extend_from_slice(&[0x00, 0x01]); // NSCOUNT
    msg.extend_from_slice(&[0x00, 0x00]);
    push_question(&mut msg, label);
    msg.extend_from_slice(&[0x04, b't', b'e', b's', b't', 0x00]); // zone name
    msg.extend_from_slice(&[0x00, 0x06, 0x00, 0x01]); // SOA, IN
    msg.extend_from_slice(&soa_ttl.to_be_bytes());
    let rdata: &[u8] = &[
        0x02, b'n', b's', 0x00, // mname "ns."
        0x02, b'h', b'm', 0x00, // rname "hm."
        0x00, 0x00, 0x00, 0x01, // serial
        0x00, 0x00, 0x1c, 0x20, // refresh
        0x00, 0x00, 0x0e, 0x10, // retry
        0x00, 0x12, 0x75, 0x00, // expire
        0x00, 0x00, 0x00, 0x3c, // minimum
    ];
    msg.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    msg.extend_from_slice(rdata);
    msg
}

fn push_question(msg: &mut Vec<u8>, label: &[u8]) {
    msg.push(label.len() as u8);
    msg.extend_from_slice(label);
    msg.extend_from_slice(&[0x04, b't', b'e', b's', b't', 0x00]);
    msg.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // A, IN
}
