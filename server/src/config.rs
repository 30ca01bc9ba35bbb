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

//! Server and worker configuration.
//!
//! No file- or environment-based loader lives here; that belongs to the
//! out-of-scope CLI layer. This module only owns the struct, its defaults,
//! and validation.

use std::net::SocketAddr;

const KB: usize = 1024;

/// Configuration shared by the whole server: address, worker topology, and
/// the buffer/queue sizes every worker is built with.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host and port to bind.
    pub address: SocketAddr,
    /// Number of workers to spawn. Must be at least 1.
    pub worker_count: usize,
    /// If true, each worker binds its own listen socket with `SO_REUSEPORT`
    /// and accepts independently. If false, a single shared listen socket
    /// fans accepted sockets out to workers in round robin.
    pub reuse_port: bool,
    /// Kernel accept-queue depth passed to `listen(2)`.
    pub listen_backlog: u32,
    /// Fixed capacity of each connection buffer (read and write).
    pub connection_buffer_size: usize,
    /// Fixed capacity of each handshake buffer.
    pub handshake_buffer_size: usize,
    /// Per-connection pending-response queue capacity.
    pub ready_response_queue_capacity: usize,
}

impl ServerConfig {
    /// Builds a configuration with documented defaults for the given address.
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            worker_count: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            reuse_port: true,
            listen_backlog: 1024,
            connection_buffer_size: 16 * KB,
            handshake_buffer_size: 4 * KB,
            ready_response_queue_capacity: 64,
        }
    }

    /// Validates the configuration, returning a description of the first
    /// violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be at least 1".into());
        }
        if self.connection_buffer_size == 0 {
            return Err("connection_buffer_size must be greater than 0".into());
        }
        if self.handshake_buffer_size == 0 {
            return Err("handshake_buffer_size must be greater than 0".into());
        }
        if self.ready_response_queue_capacity == 0 {
            return Err("ready_response_queue_capacity must be greater than 0".into());
        }
        Ok(())
    }

    /// Per-worker view derived from this configuration, tagged with a worker
    /// index (used to label log output and, under `reuse_port`, nothing else
    /// since each worker binds the same address independently).
    pub fn worker_config(&self, id: usize) -> WorkerConfig {
        WorkerConfig {
            id,
            address: self.address,
            reuse_port: self.reuse_port,
            listen_backlog: self.listen_backlog,
            connection_buffer_size: self.connection_buffer_size,
            handshake_buffer_size: self.handshake_buffer_size,
            ready_response_queue_capacity: self.ready_response_queue_capacity,
        }
    }
}

/// The subset of [`ServerConfig`] a single [`crate::worker::Worker`] needs,
/// plus its own index.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Index of this worker among its siblings, used for logging and, in
    /// round-robin fan-out mode, to label its inbound accept channel.
    pub id: usize,
    /// Host and port to bind.
    pub address: SocketAddr,
    /// Whether this worker binds its own `SO_REUSEPORT` listen socket.
    pub reuse_port: bool,
    /// Kernel accept-queue depth.
    pub listen_backlog: u32,
    /// Fixed capacity of each connection buffer.
    pub connection_buffer_size: usize,
    /// Fixed capacity of each handshake buffer.
    pub handshake_buffer_size: usize,
    /// Per-connection pending-response queue capacity.
    pub ready_response_queue_capacity: usize,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn new_produces_valid_defaults() {
        let config = ServerConfig::new("127.0.0.1:8080".parse().unwrap());
        assert!(config.validate().is_ok());
        assert!(config.worker_count >= 1);
        assert!(config.reuse_port);
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = ServerConfig::new("127.0.0.1:8080".parse().unwrap());
        config.worker_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn worker_config_carries_id_and_shared_fields() {
        let config = ServerConfig::new("127.0.0.1:8080".parse().unwrap());
        let wc = config.worker_config(3);
        assert_eq!(3, wc.id);
        assert_eq!(config.address, wc.address);
        assert_eq!(config.connection_buffer_size, wc.connection_buffer_size);
    }
}
