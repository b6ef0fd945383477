//! The framing adapter: a virtual DNS connection over a round-tripper
//!
//! A `DnsConn` looks like a bidirectional byte connection to whoever
//! drives it. Writes enqueue serialized queries, reads perform the
//! exchange over the hidden round-tripper and hand back serialized
//! responses. Deadlines and cancellation propagate from here into the
//! back-end operation.

use crate::error::{DnsError, Result};
use crate::transport::{with_deadline, RoundTrip};
use crate::wire;
use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::trace;

/// How the host side frames the messages it writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Each write is one whole DNS message, datagram style.
    Packet,
    /// Writes carry a byte stream of 2-byte length-prefixed messages, and
    /// responses come back with the same framing.
    Stream,
}

/// A virtual DNS connection driven by a host resolver.
///
/// Within one connection, responses are returned in the order the queries
/// were written. `close` cancels an in-flight exchange and makes further
/// reads report end of stream (`Ok(0)`).
pub struct DnsConn {
    transport: Arc<dyn RoundTrip>,
    framing: Framing,
    state: Mutex<ConnState>,
}

#[derive(Default)]
struct ConnState {
    queue: VecDeque<Vec<u8>>,
    wbuf: BytesMut,
    rbuf: BytesMut,
    deadline: Option<Instant>,
    cancel: Option<oneshot::Sender<()>>,
    closed: bool,
}

impl DnsConn {
    pub fn new(transport: Arc<dyn RoundTrip>, framing: Framing) -> Self {
        Self {
            transport,
            framing,
            state: Mutex::new(ConnState::default()),
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Accept an outgoing message. Never blocks and never fails; a write
    /// after `close` is accepted but its query is never dispatched.
    pub fn write(&self, msg: &[u8]) -> usize {
        let mut state = self.state.lock();
        match self.framing {
            Framing::Packet => state.queue.push_back(msg.to_vec()),
            Framing::Stream => state.wbuf.extend_from_slice(msg),
        }
        msg.len()
    }

    /// Produce one response, exchanging the next pending query with the
    /// back-end if nothing is buffered. Returns `Ok(0)` once the
    /// connection is drained or closed.
    ///
    /// In packet mode a response larger than `buf` is discarded and
    /// reported as [`DnsError::ShortBuffer`]; it is never truncated. In
    /// stream mode the framed response may be consumed across several
    /// reads.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let (request, mut cancelled, deadline) = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(0);
            }
            if !state.rbuf.is_empty() {
                return Ok(Self::drain(&mut state.rbuf, buf));
            }

            let request = match self.framing {
                Framing::Packet => match state.queue.pop_front() {
                    Some(msg) => msg,
                    None => return Ok(0),
                },
                Framing::Stream => {
                    if state.wbuf.is_empty() {
                        return Ok(0);
                    }
                    match wire::unframe_stream(&state.wbuf) {
                        Some((msg, _)) => {
                            let msg = msg.to_vec();
                            state.wbuf.advance(2 + msg.len());
                            msg
                        }
                        None => return Err(DnsError::UnexpectedEof),
                    }
                }
            };

            let (tx, rx) = oneshot::channel();
            state.cancel = Some(tx);
            (request, rx, state.deadline)
        };

        trace!(bytes = request.len(), "dispatching query");
        // the exchange runs outside the lock; only the cancel handle and
        // the deadline snapshot tie it back to this connection
        let result = tokio::select! {
            _ = &mut cancelled => Err(DnsError::Cancelled),
            outcome = with_deadline(deadline, self.transport.round_trip(deadline, &request)) => {
                outcome.and_then(|exchanged| exchanged)
            }
        };

        let mut state = self.state.lock();
        state.cancel = None;
        let response = result?;

        match self.framing {
            Framing::Packet => {
                if buf.len() < response.len() {
                    return Err(DnsError::ShortBuffer);
                }
                buf[..response.len()].copy_from_slice(&response);
                Ok(response.len())
            }
            Framing::Stream => {
                if response.len() > wire::MAX_MESSAGE_LEN {
                    return Err(DnsError::ShortBuffer);
                }
                state.rbuf.put_u16(response.len() as u16);
                state.rbuf.extend_from_slice(&response);
                Ok(Self::drain(&mut state.rbuf, buf))
            }
        }
    }

    /// Cancel any in-flight exchange and drive the connection to its
    /// terminal state. Accepted in any state; idempotent.
    pub fn close(&self) {
        let cancel = {
            let mut state = self.state.lock();
            state.closed = true;
            state.cancel.take()
        };
        if let Some(tx) = cancel {
            let _ = tx.send(());
        }
    }

    /// Set the deadline applied to future exchanges. An exchange already
    /// in flight keeps the deadline it started with.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.state.lock().deadline = deadline;
    }

    fn drain(rbuf: &mut BytesMut, buf: &mut [u8]) -> usize {
        let n = buf.len().min(rbuf.len());
        buf[..n].copy_from_slice(&rbuf[..n]);
        rbuf.advance(n);
        n
    }
}
