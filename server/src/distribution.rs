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

//! Accepted-socket distribution across workers.
//!
//! Two strategies, chosen by [`crate::config::ServerConfig::reuse_port`]:
//! either a single acceptor thread fanning sockets out to workers in round
//! robin over a real cross-thread channel (the acceptor, unlike a worker, is
//! allowed to block), or one `SO_REUSEPORT` listen socket per worker so the
//! kernel does the distribution and no inter-thread handoff exists at all.
//! The `SO_REUSEPORT` listener construction is grounded on the pack's
//! `socket2`-based mio listener setup.

use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use log::{debug, error};
use mio::net::TcpListener;
use socket2::{Domain, Protocol, Socket, Type};

fn new_listen_socket(addr: SocketAddr, reuse_port: bool, backlog: u32) -> io::Result<Socket> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    if reuse_port {
        socket.set_reuse_port(true)?;
    }
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    Ok(socket)
}

/// Binds a non-blocking listen socket for `addr`. When `reuse_port` is set,
/// `SO_REUSEPORT` and `SO_REUSEADDR` are applied before binding so multiple
/// workers can each own an independent socket on the same address. Used by
/// [`crate::worker::Worker::with_own_listener`].
pub fn bind_listener(addr: SocketAddr, reuse_port: bool, backlog: u32) -> io::Result<TcpListener> {
    let socket = new_listen_socket(addr, reuse_port, backlog)?;
    socket.set_nonblocking(true)?;
    let std_listener: StdTcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(Into::into)
}

/// Binds a blocking listen socket for `addr`, without `SO_REUSEPORT` — there
/// is exactly one of these, shared by every worker through a
/// [`RoundRobinDistribution`]. Blocking is fine here: the dedicated acceptor
/// thread this socket is handed to is allowed to block on `accept`, unlike a
/// worker's cooperative thread.
pub fn bind_shared_listener(addr: SocketAddr, backlog: u32) -> io::Result<StdTcpListener> {
    let socket = new_listen_socket(addr, false, backlog)?;
    Ok(socket.into())
}

/// One end of the acceptor-to-worker handoff channel, held by the acceptor
/// thread. Genuinely cross-thread, so it uses a real OS-backed bounded
/// channel rather than [`crate::queue::BoundedQueue`] — the acceptor thread
/// is allowed to block, unlike a worker's cooperative thread.
pub type AcceptSender = SyncSender<mio::net::TcpStream>;
/// The worker-side receiving half of the same channel.
pub type AcceptReceiver = Receiver<mio::net::TcpStream>;

/// Hands each accepted socket to the next worker in rotation.
#[derive(Debug)]
pub struct RoundRobinDistribution {
    senders: Vec<AcceptSender>,
    next: AtomicUsize,
}

impl RoundRobinDistribution {
    /// Builds a distribution strategy along with the receiving half every
    /// worker should keep, one per worker in the same order as `senders`
    /// returned, with channel capacity `backlog` per worker.
    pub fn new(worker_count: usize, backlog: usize) -> (Self, Vec<AcceptReceiver>) {
        let mut senders = Vec::with_capacity(worker_count);
        let mut receivers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let (tx, rx) = sync_channel(backlog);
            senders.push(tx);
            receivers.push(rx);
        }
        (Self { senders, next: AtomicUsize::new(0) }, receivers)
    }

    /// Hands `stream` to the next worker in rotation. Blocks if that
    /// worker's channel is full — acceptable since this runs on the
    /// dedicated acceptor thread, not a worker thread.
    pub fn dispatch(&self, stream: mio::net::TcpStream) -> Result<(), mio::net::TcpStream> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        self.senders[index].send(stream).map_err(|e| e.0)
    }
}

/// Spawns the dedicated acceptor thread for the shared-listen-socket
/// strategy: blocks on `listener.accept()` in a loop, hands each accepted
/// stream to `distribution`, and exits once every worker channel has
/// disconnected. Runs on its own thread because it blocks, unlike a worker.
pub fn spawn_acceptor(listener: StdTcpListener, distribution: RoundRobinDistribution) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match listener.accept() {
            Ok((stream, _addr)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    error!("acceptor: failed to set accepted socket non-blocking: {e}");
                    continue;
                }
                let stream = mio::net::TcpStream::from_std(stream);
                if distribution.dispatch(stream).is_err() {
                    debug!("acceptor: every worker channel disconnected, stopping");
                    break;
                }
            }
            Err(e) => error!("acceptor: accept failed: {e}"),
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn bind_listener_succeeds_on_ephemeral_port() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = bind_listener(addr, false, 128).unwrap();
        assert!(listener.local_addr().unwrap().port() > 0);
    }

    #[test]
    fn round_robin_distribution_cycles_through_workers() {
        let (distribution, receivers) = RoundRobinDistribution::new(2, 4);
        assert_eq!(2, receivers.len());

        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        for i in 0..4 {
            let _client = std::net::TcpStream::connect(addr).unwrap();
            let (stream, _) = listener.accept().unwrap();
            stream.set_nonblocking(true).unwrap();
            let stream = mio::net::TcpStream::from_std(stream);

            distribution.dispatch(stream).unwrap();

            let expected = i % 2;
            let other = 1 - expected;
            assert!(receivers[expected].try_recv().is_ok(), "dispatch {i} should land on worker {expected}");
            assert!(receivers[other].try_recv().is_err(), "dispatch {i} should not reach worker {other}");
        }
    }

    #[test]
    fn spawn_acceptor_dispatches_accepted_connections_round_robin() {
        let listener = bind_shared_listener("127.0.0.1:0".parse().unwrap(), 128).unwrap();
        let addr = listener.local_addr().unwrap();
        let (distribution, receivers) = RoundRobinDistribution::new(2, 4);
        let _acceptor = spawn_acceptor(listener, distribution);

        let _first = std::net::TcpStream::connect(addr).unwrap();
        let _second = std::net::TcpStream::connect(addr).unwrap();

        assert!(receivers[0].recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(receivers[1].recv_timeout(Duration::from_secs(2)).is_ok());
    }
}
