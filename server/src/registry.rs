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

//! URL-path handler registry.
//!
//! Each worker keeps its own copy, applied locally from a broadcast update
//! rather than shared behind a lock, so lookups never contend across
//! workers. A handler is a plain closure producing an [`HttpResponse`]
//! rather than a type that calls `appendResponse` itself — `RequestHandlerService`
//! owns appending the result to the Connection's response queue, so the
//! handler only needs to compute a value.

use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;

use crate::exchange::HttpExchange;
use crate::response::HttpResponse;

/// A request handler: given the parsed exchange, produce a response.
pub trait Handler: Send + Sync {
    /// Computes the response for `exchange`.
    fn handle(&self, exchange: &HttpExchange) -> HttpResponse;
}

impl<F> Handler for F
where
    F: Fn(&HttpExchange) -> HttpResponse + Send + Sync,
{
    fn handle(&self, exchange: &HttpExchange) -> HttpResponse {
        self(exchange)
    }
}

/// A broadcast update applied identically by every worker.
#[derive(Clone)]
pub struct RegisterUrlHandlers {
    entries: Vec<(String, Arc<dyn Handler>)>,
}

impl std::fmt::Debug for RegisterUrlHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterUrlHandlers")
            .field("paths", &self.entries.iter().map(|(path, _)| path.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

impl RegisterUrlHandlers {
    /// Builds an update registering a single `path -> handler` mapping.
    pub fn single(path: impl Into<String>, handler: impl Handler + 'static) -> Self {
        Self {
            entries: vec![(path.into(), Arc::new(handler))],
        }
    }

    /// Builds an update registering several mappings at once.
    pub fn bulk(entries: Vec<(String, Arc<dyn Handler>)>) -> Self {
        Self { entries }
    }
}

/// Exact-match mapping from request path to handler, owned independently by
/// each worker.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("paths", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    /// Applies a broadcast update, overwriting any existing mapping for the
    /// same path.
    pub fn apply(&mut self, update: &RegisterUrlHandlers) {
        for (path, handler) in &update.entries {
            self.handlers.insert(path.clone(), Arc::clone(handler));
        }
    }

    /// Looks up the handler registered for `path_bytes`, if any.
    pub fn lookup(&self, path_bytes: &[u8]) -> Option<&Arc<dyn Handler>> {
        let path = std::str::from_utf8(path_bytes).ok()?;
        self.handlers.get(path)
    }

    /// Invokes the matching handler, falling back to the shared `404 Not
    /// Found` handler when no mapping exists. A panicking handler is not
    /// caught here; the caller (`Worker::run_request_handler_service`) wraps
    /// dispatch in `catch_unwind` and closes only the offending Connection.
    pub fn dispatch(&self, exchange: &HttpExchange) -> HttpResponse {
        match self.lookup(exchange.path_bytes()) {
            Some(handler) => handler.handle(exchange),
            None => HttpResponse::not_found(),
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One sender per worker for broadcasting [`RegisterUrlHandlers`] updates
/// after startup, paired with the receiving half each worker installs via
/// [`crate::worker::Worker::set_registry_updates`] — the delivery side of
/// "registry updates are broadcast onto every worker's inter-worker queue;
/// each worker applies updates locally". Mirrors
/// [`crate::distribution::RoundRobinDistribution`]'s one-channel-per-worker
/// shape, but fans the same update out to every receiver instead of routing
/// each item to exactly one.
#[derive(Debug)]
pub struct RegistryBroadcaster {
    senders: Vec<SyncSender<RegisterUrlHandlers>>,
}

impl RegistryBroadcaster {
    /// Builds a broadcaster along with one receiver per worker, in the same
    /// order, each with channel capacity `backlog`.
    pub fn new(worker_count: usize, backlog: usize) -> (Self, Vec<Receiver<RegisterUrlHandlers>>) {
        let mut senders = Vec::with_capacity(worker_count);
        let mut receivers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let (tx, rx) = sync_channel(backlog);
            senders.push(tx);
            receivers.push(rx);
        }
        (Self { senders }, receivers)
    }

    /// Sends `update` to every worker's channel, returning the number of
    /// workers whose channel was already disconnected.
    pub fn broadcast(&self, update: RegisterUrlHandlers) -> usize {
        self.senders.iter().filter(|sender| sender.send(update.clone()).is_err()).count()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use mio::Token;
    use parser::h1::request::H1Request;

    fn exchange_for(path: &str) -> HttpExchange {
        let mut request = H1Request::new();
        let line = format!("GET {path} HTTP/1.1\r\n\r\n");
        request.parse(line.as_bytes()).unwrap();
        HttpExchange::from_parsed(Token(0), &request)
    }

    #[test]
    fn dispatch_invokes_registered_handler() {
        let mut registry = HandlerRegistry::new();
        registry.apply(&RegisterUrlHandlers::single("/hello", |_: &HttpExchange| {
            HttpResponse::ok_with_content_type(b"hi".as_slice(), "text/plain")
        }));

        let response = registry.dispatch(&exchange_for("/hello"));
        assert_eq!(b"hi".as_slice(), response.body.as_ref());
    }

    #[test]
    fn dispatch_falls_back_to_not_found() {
        let registry = HandlerRegistry::new();
        let response = registry.dispatch(&exchange_for("/missing"));
        assert_eq!(parser::Status::NotFound, response.status);
    }

    #[test]
    fn broadcaster_delivers_update_to_every_worker() {
        let (broadcaster, receivers) = RegistryBroadcaster::new(3, 4);
        let update = RegisterUrlHandlers::single("/hello", |_: &HttpExchange| HttpResponse::ok(b"hi".as_slice()));

        let failures = broadcaster.broadcast(update);
        assert_eq!(0, failures);
        for receiver in &receivers {
            assert!(receiver.try_recv().is_ok());
        }
    }

    #[test]
    fn apply_overwrites_existing_mapping() {
        let mut registry = HandlerRegistry::new();
        registry.apply(&RegisterUrlHandlers::single("/x", |_: &HttpExchange| HttpResponse::ok(b"one".as_slice())));
        registry.apply(&RegisterUrlHandlers::single("/x", |_: &HttpExchange| HttpResponse::ok(b"two".as_slice())));

        let response = registry.dispatch(&exchange_for("/x"));
        assert_eq!(b"two".as_slice(), response.body.as_ref());
    }
}
