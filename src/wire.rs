//! Wire-format codec for DNS messages
//!
//! Parses just enough of RFC 1035 to decide cacheability: header counts,
//! label walks, record TTLs. Messages always pass through to the network
//! verbatim; a parse failure only marks a message uncacheable.

use bytes::{BufMut, BytesMut};

/// DNS header length in bytes.
pub const HEADER_LEN: usize = 12;

/// Largest message a 2-byte length prefix can carry.
pub const MAX_MESSAGE_LEN: usize = 65_535;

/// Returns the message bytes with the 2-byte transaction ID removed, or
/// `None` for messages shorter than a header.
pub fn strip_id(msg: &[u8]) -> Option<&[u8]> {
    (msg.len() >= HEADER_LEN).then(|| &msg[2..])
}

/// Splices a transaction ID back onto an ID-stripped message body.
pub fn prepend_id(id: [u8; 2], body: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(2 + body.len());
    msg.extend_from_slice(&id);
    msg.extend_from_slice(body);
    msg
}

/// True when the QR bit marks the message as a query.
pub fn is_query(msg: &[u8]) -> bool {
    msg.len() >= HEADER_LEN && msg[2] & 0x80 == 0
}

/// True when the QR bit marks the message as a response.
pub fn is_response(msg: &[u8]) -> bool {
    msg.len() >= HEADER_LEN && msg[2] & 0x80 != 0
}

/// ANCOUNT from the header, or 0 for short messages.
pub fn answer_count(msg: &[u8]) -> usize {
    if msg.len() < HEADER_LEN {
        return 0;
    }
    be16(msg, 6)
}

/// Minimum TTL in seconds across every resource record in `msg`.
///
/// Non-positive values mean the message must not be cached: the message is
/// truncated or malformed, or it carries no records at all to derive a
/// lifetime from.
pub fn min_ttl(msg: &[u8]) -> i64 {
    if msg.len() < HEADER_LEN {
        return -1;
    }

    let qdcount = be16(msg, 4);
    let rdcount = be16(msg, 6) + be16(msg, 8) + be16(msg, 10);
    if rdcount == 0 {
        return 0;
    }

    let mut msg = &msg[HEADER_LEN..];

    // skip questions
    for _ in 0..qdcount {
        let Some(name) = name_len(msg) else {
            return -1;
        };
        if name + 4 > msg.len() {
            return -1;
        }
        msg = &msg[name + 4..];
    }

    // parse records
    let mut ttl = i64::from(u32::MAX);
    for _ in 0..rdcount {
        let Some(name) = name_len(msg) else {
            return -1;
        };
        if name + 10 > msg.len() {
            return -1;
        }
        let rttl = i64::from(be32(msg, name + 4));
        let rlen = be16(msg, name + 8);
        if name + 10 + rlen > msg.len() {
            return -1;
        }
        if rttl < ttl {
            ttl = rttl;
        }
        msg = &msg[name + 10 + rlen..];
    }

    ttl
}

/// Bytes consumed by the DNS name starting at offset 0 of `msg`, including
/// the terminator or compression pointer. `None` for reserved label types.
///
/// The walk never reads past the buffer; a name that runs off the end
/// reports a length past `msg.len()`, which the caller's bounds checks
/// reject.
fn name_len(msg: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i < msg.len() {
        match msg[i] {
            0 => {
                // end of name
                i += 1;
                break;
            }
            b if b >= 0xc0 => {
                // compression pointer
                i += 2;
                break;
            }
            b if b >= 0x40 => {
                // reserved label type
                return None;
            }
            b => i += usize::from(b) + 1,
        }
    }
    Some(i)
}

/// Prepends the 2-byte big-endian length used on stream transports.
pub fn frame_stream(msg: &[u8]) -> BytesMut {
    let mut framed = BytesMut::with_capacity(2 + msg.len());
    framed.put_u16(msg.len() as u16);
    framed.put_slice(msg);
    framed
}

/// Splits one length-prefixed message off the front of `stream`, returning
/// the message and the remaining bytes. `None` until a full frame is
/// buffered.
pub fn unframe_stream(stream: &[u8]) -> Option<(&[u8], &[u8])> {
    if stream.len() < 2 {
        return None;
    }
    let size = usize::from(stream[0]) << 8 | usize::from(stream[1]);
    if stream.len() < 2 + size {
        return None;
    }
    Some((&stream[2..2 + size], &stream[2 + size..]))
}

fn be16(msg: &[u8], at: usize) -> usize {
    usize::from(msg[at]) << 8 | usize::from(msg[at + 1])
}

fn be32(msg: &[u8], at: usize) -> u32 {
    u32::from(msg[at]) << 24
        | u32::from(msg[at + 1]) << 16
        | u32::from(msg[at + 2]) << 8
        | u32::from(msg[at + 3])
}
