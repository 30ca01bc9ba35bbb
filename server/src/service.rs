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

//! Identity of the four cooperative pipeline stages a [`Worker`] runs.
//!
//! [`Worker`]: crate::worker::Worker
//!
//! Each stage is a Service in the sense of the data model: a name and a
//! bounded input queue (here, the stage's ready-queue of [`mio::Token`]s,
//! owned by the `Worker`), run to queue-empty before the next stage takes a
//! turn. A Connection tracks, per stage, whether it is already queued there
//! so the "enqueued at most once per Service" invariant holds without a
//! central dispatcher object.

use std::fmt::Display;

/// One of the four HTTP pipeline stages within a worker, in data-flow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Drains newly accepted sockets and registers them for read-readiness.
    ConnectionAccept,
    /// Reads available bytes and feeds the parser.
    ConnectionRead,
    /// Invokes the matching handler for each parsed request.
    RequestHandler,
    /// Renders and writes queued responses to the socket.
    ResponseWriter,
}

impl Service {
    /// Stable name used in log output.
    pub fn name(&self) -> &'static str {
        match self {
            Service::ConnectionAccept => "ConnectionAcceptService",
            Service::ConnectionRead => "ConnectionReadService",
            Service::RequestHandler => "RequestHandlerService",
            Service::ResponseWriter => "ResponseWriterService",
        }
    }
}

impl Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-Connection flags tracking which Service ready-queues it currently sits
/// in, preventing the double-enqueue the data model's invariant (b) forbids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueuedFlags {
    read: bool,
    handle: bool,
    write: bool,
}

impl QueuedFlags {
    /// True iff the connection is already queued for `service`.
    pub fn is_queued(&self, service: Service) -> bool {
        match service {
            Service::ConnectionAccept => false,
            Service::ConnectionRead => self.read,
            Service::RequestHandler => self.handle,
            Service::ResponseWriter => self.write,
        }
    }

    /// Marks the connection as queued for `service`.
    pub fn set_queued(&mut self, service: Service) {
        match service {
            Service::ConnectionAccept => {}
            Service::ConnectionRead => self.read = true,
            Service::RequestHandler => self.handle = true,
            Service::ResponseWriter => self.write = true,
        }
    }

    /// Clears the queued flag for `service`, e.g. once it has been popped
    /// and run.
    pub fn clear_queued(&mut self, service: Service) {
        match service {
            Service::ConnectionAccept => {}
            Service::ConnectionRead => self.read = false,
            Service::RequestHandler => self.handle = false,
            Service::ResponseWriter => self.write = false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn queued_flags_default_to_unqueued() {
        let flags = QueuedFlags::default();
        assert!(!flags.is_queued(Service::ConnectionRead));
        assert!(!flags.is_queued(Service::RequestHandler));
        assert!(!flags.is_queued(Service::ResponseWriter));
    }

    #[test]
    fn set_and_clear_queued_round_trip() {
        let mut flags = QueuedFlags::default();
        flags.set_queued(Service::ConnectionRead);
        assert!(flags.is_queued(Service::ConnectionRead));
        flags.clear_queued(Service::ConnectionRead);
        assert!(!flags.is_queued(Service::ConnectionRead));
    }

    #[test]
    fn service_name_is_stable() {
        assert_eq!("ConnectionReadService", Service::ConnectionRead.name());
        assert_eq!("ResponseWriterService", Service::ResponseWriter.to_string());
    }
}
