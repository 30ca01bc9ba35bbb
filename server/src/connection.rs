// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The per-connection state machine: `Open` while the socket is live,
//! `Closed` once torn down. Grounded on the teacher's `Connection` trait and
//! `PlainConnection` (TLS and the H2/H3 stub variants are dropped — plain
//! HTTP/1.1 only), generalized for the staged read → handle → write pipeline
//! instead of a single flat `read`/`write` pair.
//!
//! A Connection is owned exclusively by one [`crate::worker::Worker`]; every
//! method here assumes it is only ever called from that worker's thread.

use std::borrow::{Borrow, BorrowMut};
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read};

use log::debug;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use parser::h1::request::H1Request;
use parser::h1::ParseOutcome;

use crate::buffer::{Buffer, BufferPool};
use crate::error::Error;
use crate::exchange::HttpExchange;
use crate::queue::BoundedQueue;
use crate::response::{render_response, CommonHeaders, HttpResponse};
use crate::service::QueuedFlags;

/// Lifecycle state. `Accepting` exists only as the moment between `accept(2)`
/// returning and [`Connection::accept`] finishing registration; by the time a
/// `Connection` value exists it is already `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
}

/// One accepted TCP connection and everything the pipeline stages need to
/// drive it: buffers, queued requests/responses, and readiness bookkeeping.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    token: Token,
    state: State,
    read_buffer: Option<Buffer>,
    write_buffer: Option<Buffer>,
    requests: VecDeque<HttpExchange>,
    responses: BoundedQueue<HttpResponse>,
    /// A response a handler already produced but couldn't enqueue because
    /// `responses` was full; retried before any further request is handled,
    /// standing in for the source's suspending `send`.
    pending_response: Option<HttpResponse>,
    queued: QueuedFlags,
}

impl Connection {
    /// Wraps a freshly accepted socket. Sets `TCP_NODELAY`; does not
    /// register with the selector — the caller does that once the
    /// Connection has a stable home in the worker's `Slab`.
    pub fn accept(stream: TcpStream, token: Token, ready_response_queue_capacity: usize) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            token,
            state: State::Open,
            read_buffer: None,
            write_buffer: None,
            requests: VecDeque::new(),
            responses: BoundedQueue::new(ready_response_queue_capacity),
            pending_response: None,
            queued: QueuedFlags::default(),
        })
    }

    /// This connection's selector token.
    pub fn token(&self) -> Token {
        self.token
    }

    /// True once this connection has been torn down; no further reads,
    /// writes, or enqueues may occur.
    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Whether `service` currently has this connection queued, per the
    /// "enqueued at most once" invariant.
    pub fn is_queued(&self, service: crate::service::Service) -> bool {
        self.queued.is_queued(service)
    }

    /// Marks this connection as queued for `service`.
    pub fn set_queued(&mut self, service: crate::service::Service) {
        self.queued.set_queued(service);
    }

    /// Clears the queued flag for `service`.
    pub fn clear_queued(&mut self, service: crate::service::Service) {
        self.queued.clear_queued(service);
    }

    /// Registers this connection for read-readiness.
    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stream, self.token, Interest::READABLE)
    }

    /// Re-registers for read-readiness only, e.g. once the write queue has
    /// fully drained.
    pub fn reregister_readable(&mut self, registry: &Registry) -> io::Result<()> {
        registry.reregister(&mut self.stream, self.token, Interest::READABLE)
    }

    /// Re-registers for write-readiness (kept combined with read-readiness,
    /// since incoming bytes are still welcome while a write drains), used
    /// after a partial write so the next WRITABLE event re-enqueues this
    /// connection on the writer.
    pub fn reregister_writable(&mut self, registry: &Registry) -> io::Result<()> {
        registry.reregister(&mut self.stream, self.token, Interest::READABLE | Interest::WRITABLE)
    }

    /// Cancels the selector registration. Safe to call once; a second call
    /// (e.g. racing a `CancelledKeyException`-equivalent) is swallowed.
    fn deregister(&mut self, registry: &Registry) {
        let _ = registry.deregister(&mut self.stream);
    }

    /// Tears the connection down: marks it `Closed`, drops any buffers held
    /// from the pool (the pool handles are simply dropped, not released back
    /// — a closed connection's buffers are gone for good, matching "closed
    /// is terminal"), and deregisters from `registry`. Idempotent.
    pub fn close(&mut self, registry: &Registry, reason: &str) {
        if self.state == State::Closed {
            return;
        }
        debug!("closing connection {:?}: {reason}", self.token);
        self.state = State::Closed;
        self.read_buffer = None;
        self.write_buffer = None;
        self.deregister(registry);
    }

    /// Performs a non-blocking read loop, feeding completed requests onto
    /// this connection's request deque. Returns `true` if at least one new
    /// [`HttpExchange`] was queued (the caller should offer this connection
    /// to `RequestHandlerService` if its deque was previously empty).
    ///
    /// On `Ok(0)` from the socket or a malformed request, the connection is
    /// closed and the corresponding [`Error`] is returned; the caller must
    /// not read or write this connection again.
    pub fn fill(&mut self, pool: &mut BufferPool, registry: &Registry) -> Result<bool, Error> {
        if self.read_buffer.is_none() {
            self.read_buffer = Some(pool.acquire());
        }

        loop {
            let buffer = self.read_buffer.as_mut().expect("acquired above");
            if buffer.remaining_mut() == 0 {
                buffer.reserve(buffer.remaining_mut().max(1));
            }
            match self.stream.read(BorrowMut::<[u8]>::borrow_mut(buffer)) {
                Ok(0) => {
                    self.close(registry, "peer closed");
                    return Err(Error::PeerClosed);
                }
                Ok(n) => buffer.mark_written(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close(registry, "read failed");
                    return Err(Error::ReadFailed(e));
                }
            }
        }

        let mut queued_any = false;
        loop {
            let parsed = {
                let buffer = self.read_buffer.as_ref().expect("acquired above");
                let unread = Borrow::<[u8]>::borrow(buffer);
                if unread.is_empty() {
                    None
                } else {
                    let mut request = H1Request::new();
                    match request.parse(unread) {
                        Ok(ParseOutcome::Complete(consumed)) => {
                            Some(Ok((consumed, HttpExchange::from_parsed(self.token, &request))))
                        }
                        Ok(ParseOutcome::Incomplete) => None,
                        Err(e) => Some(Err(e)),
                    }
                }
            };

            match parsed {
                None => break,
                Some(Err(e)) => {
                    self.close(registry, "malformed request");
                    return Err(Error::Parse(e));
                }
                Some(Ok((consumed, exchange))) => {
                    self.read_buffer.as_mut().expect("acquired above").mark_read(consumed);
                    self.requests.push_back(exchange);
                    queued_any = true;
                }
            }
        }

        if matches!(&self.read_buffer, Some(b) if b.is_empty()) {
            if let Some(buffer) = self.read_buffer.take() {
                pool.release(buffer);
            }
        }

        Ok(queued_any)
    }

    /// Pops the next queued, unprocessed request, if any.
    pub fn pop_request(&mut self) -> Option<HttpExchange> {
        self.requests.pop_front()
    }

    /// True while unprocessed requests remain queued.
    pub fn has_queued_requests(&self) -> bool {
        !self.requests.is_empty()
    }

    /// Takes a previously-blocked response awaiting retry, if any.
    pub fn take_pending_response(&mut self) -> Option<HttpResponse> {
        self.pending_response.take()
    }

    /// Attempts to enqueue `response` onto the ready-response queue. On
    /// success, returns whether the queue was empty beforehand (the caller
    /// should offer this connection to `ResponseWriterService` if so). On
    /// failure (queue full), stashes `response` as the pending response and
    /// returns it back to the caller, standing in for the suspending `send`.
    pub fn try_enqueue_response(&mut self, response: HttpResponse) -> Result<bool, HttpResponse> {
        let was_empty = self.responses.is_empty();
        match self.responses.offer(response) {
            Ok(()) => Ok(was_empty),
            Err(response) => {
                self.pending_response = Some(response);
                Err(response)
            }
        }
    }

    /// Renders as many queued responses as fit into the write buffer, then
    /// writes what it can to the socket. Returns `true` once both the
    /// response queue and the write buffer have fully drained; `false` if
    /// work remains (a response didn't fit this pass, or the socket write
    /// was partial) — the caller should retry on the next WRITABLE event.
    ///
    /// A response that doesn't fit into a write buffer that is otherwise
    /// completely empty can never be rendered, regardless of how many times
    /// this is retried; that case closes the connection rather than
    /// chunking or growing the buffer without bound.
    pub fn flush(&mut self, pool: &mut BufferPool, registry: &Registry, common: &mut CommonHeaders) -> Result<bool, Error> {
        if self.write_buffer.is_none() {
            self.write_buffer = Some(pool.acquire());
        }

        loop {
            let buffer_was_empty = self.write_buffer.as_ref().expect("acquired above").is_empty();
            let Some(needed) = self.responses.peek().map(|r| r.output_size() + common.size()) else {
                break;
            };
            let buffer = self.write_buffer.as_mut().expect("acquired above");
            if buffer.remaining_mut() < needed {
                if buffer_was_empty {
                    self.close(registry, "response exceeds write buffer capacity");
                    return Err(Error::ResponseTooLarge);
                }
                break;
            }
            let response = self.responses.pop().expect("peeked above");
            let buffer = self.write_buffer.as_mut().expect("acquired above");
            let rendered = render_response(buffer, &response, common);
            debug_assert!(rendered, "capacity was checked above");
        }

        if !self.write_to_socket(registry)? {
            self.reregister_writable(registry).map_err(Error::WriteFailed)?;
            return Ok(false);
        }

        if matches!(&self.write_buffer, Some(b) if b.is_empty()) {
            if let Some(buffer) = self.write_buffer.take() {
                pool.release(buffer);
            }
            self.reregister_readable(registry).map_err(Error::WriteFailed)?;
        }

        Ok(self.responses.is_empty() && self.pending_response.is_none())
    }

    /// Writes as much of the write buffer to the socket as the kernel will
    /// accept right now. Returns `true` once the buffer has fully drained.
    fn write_to_socket(&mut self, registry: &Registry) -> Result<bool, Error> {
        loop {
            let buffer = self.write_buffer.as_mut().expect("caller ensures buffer exists");
            if buffer.is_empty() {
                return Ok(true);
            }
            match io::Write::write(&mut self.stream, Borrow::<[u8]>::borrow(buffer)) {
                Ok(0) => {
                    self.close(registry, "write returned zero");
                    return Err(Error::WriteFailed(io::Error::from(ErrorKind::WriteZero)));
                }
                Ok(n) => buffer.mark_read(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close(registry, "write failed");
                    return Err(Error::WriteFailed(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use mio::net::TcpStream as MioTcpStream;
    use mio::Poll;
    use std::io::Write;
    use std::net::TcpStream as StdTcpStream;

    fn connected_pair() -> (MioTcpStream, StdTcpStream, Poll) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdTcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let server = MioTcpStream::from_std(server);
        let poll = Poll::new().unwrap();
        (server, client, poll)
    }

    #[test]
    fn fill_queues_a_complete_request() {
        let (server, mut client, _poll) = connected_pair();
        let mut pool = BufferPool::new(256);
        let registry_poll = Poll::new().unwrap();
        let mut conn = Connection::accept(server, Token(1), 64).unwrap();
        conn.register(registry_poll.registry()).unwrap();

        client.write_all(b"GET /hello HTTP/1.1\r\n\r\n").unwrap();
        client.flush().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let queued = conn.fill(&mut pool, registry_poll.registry()).unwrap();
        assert!(queued);
        assert!(conn.has_queued_requests());
        let exchange = conn.pop_request().unwrap();
        assert_eq!("/hello", exchange.target);
    }

    #[test]
    fn flush_writes_rendered_response_to_socket() {
        let (server, mut client, _poll) = connected_pair();
        let mut pool = BufferPool::new(256);
        let registry_poll = Poll::new().unwrap();
        let mut common = CommonHeaders::new();
        let mut conn = Connection::accept(server, Token(2), 64).unwrap();
        conn.register(registry_poll.registry()).unwrap();

        assert!(conn.try_enqueue_response(HttpResponse::ok(b"hi".as_slice())).unwrap());
        let drained = conn.flush(&mut pool, registry_poll.registry(), &mut common).unwrap();
        assert!(drained);

        let mut out = [0u8; 256];
        std::thread::sleep(std::time::Duration::from_millis(20));
        let n = client.read(&mut out).unwrap();
        let text = String::from_utf8_lossy(&out[..n]);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn close_is_idempotent() {
        let (server, _client, _poll) = connected_pair();
        let registry_poll = Poll::new().unwrap();
        let mut conn = Connection::accept(server, Token(3), 64).unwrap();
        conn.close(registry_poll.registry(), "test");
        conn.close(registry_poll.registry(), "test again");
        assert!(conn.is_closed());
    }
}
