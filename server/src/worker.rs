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

//! The per-worker cooperative scheduler.
//!
//! Grounded on the teacher's `Listener`: a `Poll`, a `Slab` of owned
//! connections, and an accept/read/close event loop. The four pipeline
//! stages from the data model (`ConnectionAcceptService`, `ConnectionRead`,
//! `RequestHandler`, `ResponseWriter`) are realized not as a generic
//! trait-object actor framework but as four ready-queues of [`Token`] plus
//! four methods on `Worker`, each run to queue-empty before the next stage
//! takes its turn — the teacher's single-struct-with-a-`Slab` shape,
//! generalized from one flat read/write pair into the staged pipeline the
//! HTTP model needs.

use std::any::Any;
use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;

use log::{debug, error, warn};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;

use crate::buffer::BufferPool;
use crate::config::WorkerConfig;
use crate::connection::Connection;
use crate::distribution::{bind_listener, AcceptReceiver};
use crate::error::Error;
use crate::registry::{HandlerRegistry, RegisterUrlHandlers};
use crate::response::CommonHeaders;
use crate::service::Service;

/// Token reserved for this worker's own listen socket, when it owns one
/// (`SO_REUSEPORT` mode). Never a valid `Slab` index since `Slab` keys start
/// at 0 and this worker will run out of memory long before reaching
/// `usize::MAX - 1`.
const LISTENER_TOKEN: Token = Token(usize::MAX - 1);

/// How the worker obtains newly accepted sockets.
enum Source {
    /// Owns its own `SO_REUSEPORT` listen socket and accepts locally.
    OwnListener(TcpListener),
    /// Receives already-accepted sockets from a dedicated acceptor thread.
    Channel(AcceptReceiver),
}

/// A single OS thread running the cooperative scheduler described in the
/// module doc comment. Not `Send`/`Sync` in spirit even where the compiler
/// wouldn't object — every mutating method assumes it is only ever called
/// from the thread that owns it.
pub struct Worker {
    id: usize,
    poll: Poll,
    source: Source,
    connections: Slab<Connection>,
    connection_pool: BufferPool,
    handshake_pool: BufferPool,
    registry: HandlerRegistry,
    common_headers: CommonHeaders,
    ready_response_queue_capacity: usize,
    registry_updates: Option<Receiver<RegisterUrlHandlers>>,
    read_queue: VecDeque<Token>,
    handle_queue: VecDeque<Token>,
    write_queue: VecDeque<Token>,
    shutting_down: bool,
}

impl Worker {
    /// Builds a worker that owns its own `SO_REUSEPORT` listen socket.
    pub fn with_own_listener(config: WorkerConfig) -> io::Result<Self> {
        let listener = bind_listener(config.address, true, config.listen_backlog)?;
        Self::new(config, Source::OwnListener(listener))
    }

    /// Builds a worker that receives accepted sockets from a shared
    /// acceptor thread over `accept_rx`.
    pub fn with_accept_channel(config: WorkerConfig, accept_rx: AcceptReceiver) -> io::Result<Self> {
        Self::new(config, Source::Channel(accept_rx))
    }

    fn new(config: WorkerConfig, mut source: Source) -> io::Result<Self> {
        let poll = Poll::new()?;
        if let Source::OwnListener(listener) = &mut source {
            poll.registry().register(listener, LISTENER_TOKEN, Interest::READABLE)?;
        }

        Ok(Self {
            id: config.id,
            poll,
            source,
            connections: Slab::new(),
            connection_pool: BufferPool::new(config.connection_buffer_size),
            handshake_pool: BufferPool::new(config.handshake_buffer_size),
            registry: HandlerRegistry::new(),
            common_headers: CommonHeaders::new(),
            ready_response_queue_capacity: config.ready_response_queue_capacity,
            registry_updates: None,
            read_queue: VecDeque::new(),
            handle_queue: VecDeque::new(),
            write_queue: VecDeque::new(),
            shutting_down: false,
        })
    }

    /// Registers the channel on which broadcast handler-registration updates
    /// arrive. Must be called before [`Worker::run`]; analogous to the
    /// scheduler contract's "`spawn` before `run`, no dynamic spawning after
    /// start".
    pub fn set_registry_updates(&mut self, updates: Receiver<RegisterUrlHandlers>) {
        self.registry_updates = Some(updates);
    }

    /// Applies a handler-registration update immediately. Meant for startup
    /// wiring before [`Worker::run`] is called; updates delivered while
    /// running arrive instead via the channel given to
    /// [`Worker::set_registry_updates`], so every worker sees the same
    /// sequence of broadcasts.
    pub fn register_handlers(&mut self, update: &RegisterUrlHandlers) {
        self.registry.apply(update);
    }

    /// Number of connections this worker currently owns. Documented answer
    /// to the source's unconditionally-throwing `getActiveConnectionCount`:
    /// here it is simply the `Slab`'s occupancy, always available.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Runs the scheduler loop until [`Worker::shutdown`] is called from
    /// within a handler, or forever otherwise. Each iteration: apply any
    /// pending registry updates, drain the accept source, poll the
    /// selector, then run each of the four Services to queue-empty in
    /// data-flow order.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(1024);

        while !self.shutting_down {
            self.apply_registry_updates();
            self.drain_accept_source();

            let timeout = if self.has_ready_work() {
                Some(Duration::ZERO)
            } else {
                Some(Duration::from_millis(250))
            };

            match self.poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                let token = event.token();
                if token == LISTENER_TOKEN {
                    self.accept_from_own_listener();
                    continue;
                }
                if !self.connections.contains(token.0) {
                    let error = Error::SchedulerInvariantViolation(format!(
                        "readiness event for token {token:?} with no matching connection"
                    ));
                    self.log_close(token, &error);
                    continue;
                }
                if event.is_error() || event.is_read_closed() {
                    if let Some(connection) = self.connections.get_mut(token.0) {
                        connection.close(self.poll.registry(), "socket error or peer hangup");
                    }
                    self.connections.remove(token.0);
                    continue;
                }
                if event.is_readable() {
                    self.offer_read(token);
                }
                if event.is_writable() {
                    self.offer_write(token);
                }
            }

            self.run_connection_read_service();
            self.run_request_handler_service();
            self.run_response_writer_service();
        }

        self.on_shutdown();
        Ok(())
    }

    /// Requests graceful shutdown; takes effect at the top of the next
    /// `run` iteration.
    pub fn shutdown(&mut self) {
        self.shutting_down = true;
    }

    fn has_ready_work(&self) -> bool {
        !self.read_queue.is_empty() || !self.handle_queue.is_empty() || !self.write_queue.is_empty()
    }

    fn apply_registry_updates(&mut self) {
        let Some(updates) = &self.registry_updates else { return };
        loop {
            match updates.try_recv() {
                Ok(update) => self.registry.apply(&update),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.registry_updates = None;
                    break;
                }
            }
        }
    }

    /// `ConnectionAcceptService`: drains whatever new sockets are available
    /// right now and wraps each in a Connection, registered for
    /// read-readiness.
    fn drain_accept_source(&mut self) {
        match &self.source {
            Source::OwnListener(_) => {}
            Source::Channel(_) => loop {
                let stream = {
                    let Source::Channel(rx) = &self.source else { unreachable!() };
                    match rx.try_recv() {
                        Ok(stream) => stream,
                        Err(TryRecvError::Empty) => return,
                        Err(TryRecvError::Disconnected) => return,
                    }
                };
                self.accept_connection(stream);
            },
        }
    }

    fn accept_from_own_listener(&mut self) {
        loop {
            let Source::OwnListener(listener) = &self.source else { return };
            match listener.accept() {
                Ok((stream, _addr)) => self.accept_connection(stream),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("worker {}: accept failed: {e}", self.id);
                    break;
                }
            }
        }
    }

    fn accept_connection(&mut self, stream: mio::net::TcpStream) {
        let entry = self.connections.vacant_entry();
        let token = Token(entry.key());
        match Connection::accept(stream, token, self.ready_response_queue_capacity) {
            Ok(mut connection) => {
                if let Err(e) = connection.register(self.poll.registry()) {
                    warn!("worker {}: dropping connection, registration failed: {e}", self.id);
                    return;
                }
                entry.insert(connection);
                debug!("worker {}: accepted connection {:?}", self.id, token);
            }
            Err(e) => warn!("worker {}: dropping connection, setup failed: {e}", self.id),
        }
    }

    fn offer_read(&mut self, token: Token) {
        let Some(connection) = self.connections.get_mut(token.0) else { return };
        if connection.is_closed() || connection.is_queued(Service::ConnectionRead) {
            return;
        }
        connection.set_queued(Service::ConnectionRead);
        self.read_queue.push_back(token);
    }

    fn offer_write(&mut self, token: Token) {
        let Some(connection) = self.connections.get_mut(token.0) else { return };
        if connection.is_closed() || connection.is_queued(Service::ResponseWriter) {
            return;
        }
        connection.set_queued(Service::ResponseWriter);
        self.write_queue.push_back(token);
    }

    /// `ConnectionReadService`: for each queued Connection, fill from the
    /// socket and feed the parser; a Connection that produced its first
    /// queued request is offered to `RequestHandlerService`.
    fn run_connection_read_service(&mut self) {
        while let Some(token) = self.read_queue.pop_front() {
            let Some(connection) = self.connections.get_mut(token.0) else { continue };
            connection.clear_queued(Service::ConnectionRead);
            if connection.is_closed() {
                continue;
            }

            let had_requests = connection.has_queued_requests();
            match connection.fill(&mut self.connection_pool, self.poll.registry()) {
                Ok(queued_any) => {
                    if queued_any && !had_requests && !connection.is_queued(Service::RequestHandler) {
                        connection.set_queued(Service::RequestHandler);
                        self.handle_queue.push_back(token);
                    }
                }
                Err(e) => self.log_close(token, &e),
            }
        }
    }

    /// `RequestHandlerService`: drains each Connection's queued requests,
    /// dispatches through the handler registry, and appends the response —
    /// offering the Connection to `ResponseWriterService` exactly when the
    /// ready-response queue transitions from empty to non-empty. Dispatch
    /// runs inside `catch_unwind`: a panicking handler closes only the
    /// Connection it was handling, not the worker thread.
    fn run_request_handler_service(&mut self) {
        while let Some(token) = self.handle_queue.pop_front() {
            // `became_ready`/`failure` are decided entirely from state local
            // to this Connection; the write-queue push and the failure close
            // happen only after the Connection borrow below has ended, since
            // both go through `self` as a whole and can't overlap a borrow
            // of a single `Slab` entry.
            let mut failure = None;
            let became_ready = {
                let Some(connection) = self.connections.get_mut(token.0) else { continue };
                connection.clear_queued(Service::RequestHandler);
                if connection.is_closed() {
                    continue;
                }

                let mut became_ready = false;
                let mut blocked = false;

                if let Some(pending) = connection.take_pending_response() {
                    match connection.try_enqueue_response(pending) {
                        Ok(was_empty) => became_ready |= was_empty,
                        Err(_) => blocked = true,
                    }
                }

                while !blocked {
                    let Some(exchange) = connection.pop_request() else { break };
                    let registry = &self.registry;
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| registry.dispatch(&exchange)));
                    let response = match outcome {
                        Ok(response) => response,
                        Err(payload) => {
                            failure = Some(Error::HandlerException(panic_payload_message(&payload)));
                            break;
                        }
                    };
                    match connection.try_enqueue_response(response) {
                        Ok(was_empty) => became_ready |= was_empty,
                        Err(_) => blocked = true,
                    }
                }

                if failure.is_none() && became_ready && !connection.is_queued(Service::ResponseWriter) {
                    connection.set_queued(Service::ResponseWriter);
                    true
                } else {
                    false
                }
            };

            if let Some(error) = failure {
                self.log_close(token, &error);
                continue;
            }

            if became_ready {
                self.write_queue.push_back(token);
            }
        }
    }

    /// `ResponseWriterService`: renders and writes as much as fits; a
    /// Connection that still has work left re-registers for write
    /// readiness rather than being re-queued immediately (the next
    /// WRITABLE event re-enqueues it, per the state machine's contract).
    fn run_response_writer_service(&mut self) {
        while let Some(token) = self.write_queue.pop_front() {
            let Some(connection) = self.connections.get_mut(token.0) else { continue };
            connection.clear_queued(Service::ResponseWriter);
            if connection.is_closed() {
                continue;
            }

            match connection.flush(&mut self.connection_pool, self.poll.registry(), &mut self.common_headers) {
                Ok(_drained) => {}
                Err(e) => self.log_close(token, &e),
            }
        }
    }

    fn log_close(&mut self, token: Token, error: &Error) {
        match error {
            Error::PeerClosed => debug!("worker {}: connection {:?} closed: {error}", self.id, token),
            Error::HandlerException(_) => error!("worker {}: connection {:?} closed: {error}", self.id, token),
            Error::SchedulerInvariantViolation(msg) => {
                panic!("worker {}: scheduler invariant violated: {msg}", self.id)
            }
            _ => debug!("worker {}: connection {:?} closed: {error}", self.id, token),
        }
        self.connections.remove(token.0);
    }

    /// Iterates every owned Connection, closing each with a shared reason,
    /// ignoring individual close errors so one bad close can't block the
    /// rest; matches the source's `onShutdown` contract.
    fn on_shutdown(&mut self) {
        debug!("worker {}: shutting down, closing {} connections", self.id, self.connections.len());
        for (_, connection) in self.connections.iter_mut() {
            connection.close(self.poll.registry(), "Server is shutting down.");
        }
        self.connections.clear();
    }
}

/// Extracts a human-readable message from a caught panic payload, the way
/// the default panic hook does: `&str` and `String` are the two payload
/// types `panic!` itself ever produces.
fn panic_payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked with a non-string payload".to_owned()
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("connections", &self.connections.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::ServerConfig;
    use crate::registry::RegisterUrlHandlers;
    use crate::response::HttpResponse;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::sync::mpsc::sync_channel;

    fn test_worker() -> Worker {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap()).worker_config(0);
        let (_tx, rx) = sync_channel(4);
        Worker::with_accept_channel(config, rx).unwrap()
    }

    #[test]
    fn fresh_worker_has_no_connections() {
        let worker = test_worker();
        assert_eq!(0, worker.connection_count());
    }

    #[test]
    fn accept_connection_registers_and_tracks_it() {
        let mut worker = test_worker();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let (stream, _) = listener.accept().unwrap();
        stream.set_nonblocking(true).unwrap();
        let stream = mio::net::TcpStream::from_std(stream);

        worker.accept_connection(stream);
        assert_eq!(1, worker.connection_count());
    }

    #[test]
    fn end_to_end_dispatch_writes_expected_response() {
        let mut worker = test_worker();
        worker
            .registry
            .apply(&RegisterUrlHandlers::single("/hello", |_: &crate::exchange::HttpExchange| {
                HttpResponse::ok_with_content_type(b"hi".as_slice(), "text/plain")
            }));

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (stream, _) = listener.accept().unwrap();
        stream.set_nonblocking(true).unwrap();
        let stream = mio::net::TcpStream::from_std(stream);
        worker.accept_connection(stream);
        let token = Token(0);

        client.write_all(b"GET /hello HTTP/1.1\r\n\r\n").unwrap();
        client.flush().unwrap();
        std::thread::sleep(Duration::from_millis(20));

        worker.offer_read(token);
        worker.run_connection_read_service();
        worker.run_request_handler_service();
        worker.run_response_writer_service();

        let mut out = [0u8; 256];
        std::thread::sleep(Duration::from_millis(20));
        let n = client.read(&mut out).unwrap();
        let text = String::from_utf8_lossy(&out[..n]);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn panicking_handler_closes_only_that_connection() {
        let mut worker = test_worker();
        worker.registry.apply(&RegisterUrlHandlers::single("/boom", |_: &crate::exchange::HttpExchange| {
            panic!("handler exploded")
        }));

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (stream, _) = listener.accept().unwrap();
        stream.set_nonblocking(true).unwrap();
        let stream = mio::net::TcpStream::from_std(stream);
        worker.accept_connection(stream);
        let token = Token(0);

        client.write_all(b"GET /boom HTTP/1.1\r\n\r\n").unwrap();
        client.flush().unwrap();
        std::thread::sleep(Duration::from_millis(20));

        worker.offer_read(token);
        worker.run_connection_read_service();
        worker.run_request_handler_service();

        assert_eq!(0, worker.connection_count());
    }

    #[test]
    fn shutdown_closes_every_owned_connection() {
        let mut worker = test_worker();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let (stream, _) = listener.accept().unwrap();
        stream.set_nonblocking(true).unwrap();
        let stream = mio::net::TcpStream::from_std(stream);
        worker.accept_connection(stream);

        worker.on_shutdown();
        assert_eq!(0, worker.connection_count());
    }
}
