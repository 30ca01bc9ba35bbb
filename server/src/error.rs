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

//! Error taxonomy for the connection state machine.
//!
//! These are reasons a [`crate::connection::Connection`] moves to `Closed`,
//! not types propagated out of the worker: every variant here is handled
//! locally by the owning worker thread (logged, and the connection closed),
//! except [`Error::SchedulerInvariantViolation`], which is fatal to the
//! worker thread that observed it.

use std::fmt::Display;

use parser::h1::ParseError;

/// Reason a Connection was closed, or a fatal scheduler condition.
#[derive(Debug)]
pub enum Error {
    /// `read` returned 0 bytes: the peer closed its half of the socket.
    PeerClosed,
    /// A socket read failed (other than `WouldBlock`/`Interrupted`).
    ReadFailed(std::io::Error),
    /// A socket write failed (other than `WouldBlock`).
    WriteFailed(std::io::Error),
    /// The request bytes were malformed.
    Parse(ParseError),
    /// A response no longer fits the write buffer even after a flush.
    ResponseTooLarge,
    /// A user handler panicked or otherwise failed to produce a response.
    HandlerException(String),
    /// A mutating API was invoked off the owning worker's thread, or the
    /// selector produced readiness for a token with no matching connection.
    /// Fatal: surfaced by panicking the worker thread.
    SchedulerInvariantViolation(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::PeerClosed => f.write_str("peer closed connection"),
            Error::ReadFailed(e) => write!(f, "read failed: {e}"),
            Error::WriteFailed(e) => write!(f, "write failed: {e}"),
            Error::Parse(e) => write!(f, "parse error: {e}"),
            Error::ResponseTooLarge => f.write_str("response exceeds write buffer capacity"),
            Error::HandlerException(msg) => write!(f, "handler exception: {msg}"),
            Error::SchedulerInvariantViolation(msg) => write!(f, "scheduler invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::Parse(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::WriteFailed(err)
    }
}
