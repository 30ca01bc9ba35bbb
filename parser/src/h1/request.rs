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

//! HTTP/1.1 Request
//!
//! IETF RFC 9112

use core::str::from_utf8_unchecked;

use super::tokens::{is_header_name_token, is_header_value_token, is_request_target_token};
use super::{ParseError, ParseOutcome, ParseResult, Signal, StepResult};
use crate::raw_request::RawRequest;
use crate::{Header, Method, Version};

/// Headers beyond this count in a single request are rejected rather than
/// buffered, bounding the memory a single connection can demand.
const MAX_HEADERS: usize = 64;

/// Parsed H1 Request.
///
/// A request is re-parsed from the start of the accumulated connection
/// buffer on every read; `parse` returns [`ParseOutcome::Incomplete`] rather
/// than erroring when the buffer simply doesn't yet hold a full request.
#[derive(Debug, Default)]
pub struct H1Request<'buf> {
    /// method
    pub method: Option<Method>,
    /// target
    pub target: Option<&'buf str>,
    /// version
    pub version: Option<Version>,
    /// headers, in the order they appeared on the wire
    pub headers: Vec<Header<'buf>>,
}

impl<'b> H1Request<'b> {
    /// Creates a new, empty HTTP/1.1 request.
    pub fn new() -> Self {
        H1Request {
            method: None,
            target: None,
            version: None,
            headers: Vec::new(),
        }
    }

    /// Parses a request out of `buf`, starting from its first byte.
    ///
    /// # Example
    /// ```
    /// # use parser::{Method, Version};
    /// # use parser::h1::ParseOutcome;
    /// # use parser::h1::request::H1Request;
    /// # fn main() -> Result<(), parser::h1::ParseError> {
    /// let mut req = H1Request::new();
    /// let outcome = req.parse(b"GET / HTTP/1.1\r\n\r\n")?;
    /// assert_eq!(ParseOutcome::Complete(18), outcome);
    /// assert_eq!(Some(Method::Get), req.method);
    /// assert_eq!(Some("/"), req.target);
    /// assert_eq!(Some(Version::Http11), req.version);
    /// # Ok(())
    /// # }
    /// ```
    pub fn parse(&mut self, buf: &'b [u8]) -> ParseResult<ParseOutcome> {
        self.method = None;
        self.target = None;
        self.version = None;
        self.headers.clear();

        let original_len = buf.len();
        let mut req = RawRequest::new(buf);

        match self.run(&mut req) {
            Ok(()) => Ok(ParseOutcome::Complete(original_len - req.len())),
            Err(Signal::Incomplete) => Ok(ParseOutcome::Incomplete),
            Err(Signal::Malformed(err)) => Err(err),
        }
    }

    fn run(&mut self, buf: &mut RawRequest<'b>) -> StepResult<()> {
        self.set_method(buf)?;
        self.set_target(buf)?;
        self.set_version(buf)?;
        expect_newline(buf)?;
        self.set_headers(buf)?;
        Ok(())
    }

    fn set_method(&mut self, buf: &mut RawRequest<'b>) -> StepResult<()> {
        loop {
            match buf.next() {
                None => return Err(Signal::Incomplete),
                Some(b' ') => {
                    let slice = buf
                        .slice_skip(1)
                        .map_err(|_| Signal::Malformed(ParseError::Method))?;
                    let method = Method::try_from(slice).map_err(|_| Signal::Malformed(ParseError::Method))?;
                    self.method = Some(method);
                    return Ok(());
                }
                Some(b) if b.is_ascii_uppercase() => {}
                Some(_) => return Err(Signal::Malformed(ParseError::Method)),
            }
        }
    }

    fn set_target(&mut self, buf: &mut RawRequest<'b>) -> StepResult<()> {
        loop {
            match buf.next() {
                None => return Err(Signal::Incomplete),
                Some(b' ') => {
                    let slice = buf
                        .slice_skip(1)
                        .map_err(|_| Signal::Malformed(ParseError::Target))?;
                    // SAFETY: every byte accepted above is ascii graphic, so the
                    // slice is valid UTF-8.
                    self.target = Some(unsafe { from_utf8_unchecked(slice) });
                    return Ok(());
                }
                Some(b) if is_request_target_token(b) => {}
                Some(_) => return Err(Signal::Malformed(ParseError::Target)),
            }
        }
    }

    fn set_version(&mut self, buf: &mut RawRequest<'b>) -> StepResult<()> {
        for expected in b"HTTP/1.".iter().copied() {
            match buf.next() {
                None => return Err(Signal::Incomplete),
                Some(b) if b == expected => {}
                Some(_) => return Err(Signal::Malformed(ParseError::Version)),
            }
        }

        let version = match buf.next() {
            None => return Err(Signal::Incomplete),
            Some(b'0') => Version::Http10,
            Some(b'1') => Version::Http11,
            Some(_) => return Err(Signal::Malformed(ParseError::Version)),
        };

        buf.slice();
        self.version = Some(version);
        Ok(())
    }

    fn set_headers(&mut self, buf: &mut RawRequest<'b>) -> StepResult<()> {
        loop {
            match buf.peek() {
                None => return Err(Signal::Incomplete),
                Some(b'\r') => {
                    buf.next();
                    match buf.next() {
                        None => return Err(Signal::Incomplete),
                        Some(b'\n') => {
                            buf.slice();
                            return Ok(());
                        }
                        Some(_) => return Err(Signal::Malformed(ParseError::NewLine)),
                    }
                }
                _ => {}
            }

            if self.headers.len() >= MAX_HEADERS {
                return Err(Signal::Malformed(ParseError::TooManyHeaders));
            }

            let name = parse_header_name(buf)?;
            let value = parse_header_value(buf)?;
            self.headers.push(Header { name, value });
        }
    }
}

fn parse_header_name<'b>(buf: &mut RawRequest<'b>) -> StepResult<&'b str> {
    loop {
        match buf.next() {
            None => return Err(Signal::Incomplete),
            Some(b':') => {
                let slice = buf
                    .slice_skip(1)
                    .map_err(|_| Signal::Malformed(ParseError::HeaderName))?;
                // SAFETY: is_header_name_token restricts every byte to tchar,
                // which is a subset of ASCII.
                return Ok(unsafe { from_utf8_unchecked(slice) });
            }
            Some(b) if is_header_name_token(b) => {}
            Some(_) => return Err(Signal::Malformed(ParseError::HeaderName)),
        }
    }
}

fn parse_header_value<'b>(buf: &mut RawRequest<'b>) -> StepResult<&'b [u8]> {
    loop {
        match buf.peek() {
            None => return Err(Signal::Incomplete),
            Some(b' ') | Some(b'\t') => {
                buf.next();
            }
            _ => break,
        }
    }
    buf.slice();

    loop {
        match buf.next() {
            None => return Err(Signal::Incomplete),
            Some(b'\r') => match buf.next() {
                None => return Err(Signal::Incomplete),
                Some(b'\n') => {
                    let slice = buf
                        .slice_skip(2)
                        .map_err(|_| Signal::Malformed(ParseError::HeaderValue))?;
                    return Ok(trim_trailing_ows(slice));
                }
                Some(_) => return Err(Signal::Malformed(ParseError::NewLine)),
            },
            Some(b) if is_header_value_token(b) => {}
            Some(_) => return Err(Signal::Malformed(ParseError::HeaderValue)),
        }
    }
}

fn expect_newline<'b>(buf: &mut RawRequest<'b>) -> StepResult<()> {
    match buf.next() {
        None => return Err(Signal::Incomplete),
        Some(b'\r') => {}
        Some(_) => return Err(Signal::Malformed(ParseError::NewLine)),
    }
    match buf.next() {
        None => return Err(Signal::Incomplete),
        Some(b'\n') => {}
        Some(_) => return Err(Signal::Malformed(ParseError::NewLine)),
    }
    buf.slice();
    Ok(())
}

fn trim_trailing_ows(value: &[u8]) -> &[u8] {
    let mut end = value.len();
    while end > 0 && (value[end - 1] == b' ' || value[end - 1] == b'\t') {
        end -= 1;
    }
    &value[..end]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_request_line_with_no_headers() {
        let mut req = H1Request::new();
        let outcome = req.parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(ParseOutcome::Complete(18), outcome);
        assert_eq!(Some(Method::Get), req.method);
        assert_eq!(Some("/"), req.target);
        assert_eq!(Some(Version::Http11), req.version);
        assert!(req.headers.is_empty());
    }

    #[test]
    fn parses_headers_and_trims_ows() {
        let mut req = H1Request::new();
        let buf = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\nX-Empty:  \r\n\r\n";
        let outcome = req.parse(buf).unwrap();
        assert_eq!(ParseOutcome::Complete(buf.len()), outcome);
        assert_eq!(2, req.headers.len());
        assert_eq!("Host", req.headers[0].name);
        assert_eq!(b"example.com".as_slice(), req.headers[0].value);
        assert_eq!("X-Empty", req.headers[1].name);
        assert_eq!(b"".as_slice(), req.headers[1].value);
    }

    #[test]
    fn reports_incomplete_on_truncated_request_line() {
        let mut req = H1Request::new();
        assert_eq!(ParseOutcome::Incomplete, req.parse(b"GET / HTTP/1.").unwrap());
    }

    #[test]
    fn reports_incomplete_mid_headers() {
        let mut req = H1Request::new();
        let outcome = req.parse(b"GET / HTTP/1.1\r\nHost: example.com\r\n").unwrap();
        assert_eq!(ParseOutcome::Incomplete, outcome);
    }

    #[test]
    fn rejects_unknown_method() {
        let mut req = H1Request::new();
        assert_eq!(ParseError::Method, req.parse(b"PATCH / HTTP/1.1\r\n\r\n").unwrap_err());
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut req = H1Request::new();
        assert_eq!(ParseError::Version, req.parse(b"GET / HTTP/2.0\r\n\r\n").unwrap_err());
    }

    #[test]
    fn rejects_too_many_headers() {
        let mut req = H1Request::new();
        let mut buf = String::from("GET / HTTP/1.1\r\n");
        for i in 0..MAX_HEADERS + 1 {
            buf.push_str(&format!("X-{i}: v\r\n"));
        }
        buf.push_str("\r\n");
        assert_eq!(ParseError::TooManyHeaders, req.parse(buf.as_bytes()).unwrap_err());
    }

    #[test]
    fn consumed_len_excludes_pipelined_bytes_following_request() {
        let mut req = H1Request::new();
        let buf = b"GET / HTTP/1.1\r\n\r\nGET /next HTTP/1.1\r\n\r\n";
        let outcome = req.parse(buf).unwrap();
        assert_eq!(ParseOutcome::Complete(18), outcome);
    }
}
