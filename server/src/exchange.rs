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

//! A parsed request, owned independently of the connection buffer it was
//! parsed from.
//!
//! [`parser::h1::request::H1Request`] borrows from the connection's read
//! buffer, which is mutated (compacted, possibly reallocated) on the very
//! next read. Queuing that borrow across a cooperative suspension point
//! would need a self-referential struct, which the source material notes as
//! an unsolved problem rather than a pattern to imitate. An `HttpExchange`
//! instead copies the borrowed fields out once, immediately after a
//! successful parse, so it can sit in a queue for an arbitrary number of
//! scheduler turns.

use mio::Token;
use parser::h1::request::H1Request;
use parser::{Method, Version};

/// One parsed request, detached from the buffer it was read out of, plus a
/// back-reference to the connection it belongs to.
#[derive(Debug, Clone)]
pub struct HttpExchange {
    /// Token of the [`crate::connection::Connection`] this request arrived
    /// on, so a handler's response can be routed back to the right socket.
    pub connection: Token,
    /// HTTP method.
    pub method: Method,
    /// Request target, e.g. `/index.html`.
    pub target: String,
    /// HTTP version on the request line.
    pub version: Version,
    /// Headers, in wire order, owned as name/value string-ish pairs.
    pub headers: Vec<(String, Vec<u8>)>,
}

impl HttpExchange {
    /// Copies a completed parse out of `request` into an owned exchange
    /// addressed to `connection`.
    pub fn from_parsed(connection: Token, request: &H1Request<'_>) -> Self {
        let method = request.method.expect("parse() only returns Complete once method is set");
        let version = request.version.expect("parse() only returns Complete once version is set");
        let target = request
            .target
            .expect("parse() only returns Complete once target is set")
            .to_owned();
        let headers = request
            .headers
            .iter()
            .map(|h| (h.name.to_owned(), h.value.to_owned()))
            .collect();

        Self {
            connection,
            method,
            target,
            version,
            headers,
        }
    }

    /// The request target as bytes, for exact-match routing against a
    /// [`crate::registry::HandlerRegistry`].
    pub fn path_bytes(&self) -> &[u8] {
        self.target.as_bytes()
    }

    /// Looks up the first header matching `name`, case-insensitively, as the
    /// wire format requires.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_parsed_copies_fields_out_of_the_borrow() {
        let mut request = H1Request::new();
        request
            .parse(b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .unwrap();

        let exchange = HttpExchange::from_parsed(Token(7), &request);

        assert_eq!(Token(7), exchange.connection);
        assert_eq!(Method::Get, exchange.method);
        assert_eq!("/index.html", exchange.target);
        assert_eq!(Version::Http11, exchange.version);
        assert_eq!(Some(b"example.com".as_slice()), exchange.header("host"));
    }

    #[test]
    fn path_bytes_matches_target() {
        let mut request = H1Request::new();
        request.parse(b"GET /a/b HTTP/1.1\r\n\r\n").unwrap();
        let exchange = HttpExchange::from_parsed(Token(0), &request);
        assert_eq!(b"/a/b".as_slice(), exchange.path_bytes());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut request = H1Request::new();
        request.parse(b"GET / HTTP/1.1\r\nContent-Type: text/plain\r\n\r\n").unwrap();
        let exchange = HttpExchange::from_parsed(Token(0), &request);
        assert_eq!(Some(b"text/plain".as_slice()), exchange.header("content-type"));
        assert_eq!(None, exchange.header("x-missing"));
    }
}
