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

#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports
)]
// Disallow warnings in examples.
#![doc(test(attr(deny(warnings))))]

//! rask is a shared-nothing, per-worker cooperative HTTP/1.1 server.
//!
//! Each [`worker::Worker`] owns an OS thread, a `mio` selector, and a
//! disjoint set of connections; there is no cross-worker locking. Accepted
//! sockets are either fanned out round robin from a shared acceptor
//! ([`distribution::RoundRobinDistribution`]) or distributed by the kernel
//! via `SO_REUSEPORT`, per [`config::ServerConfig::reuse_port`].
//!
//! ## Examples
//!
//! See `demos/` in the source repository for a runnable server.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod distribution;
pub mod error;
pub mod exchange;
pub mod registry;
pub mod response;
pub mod service;
pub mod worker;

mod queue;

pub use config::{ServerConfig, WorkerConfig};
pub use error::Error;
pub use exchange::HttpExchange;
pub use registry::{Handler, HandlerRegistry, RegisterUrlHandlers};
pub use response::HttpResponse;
pub use worker::Worker;
