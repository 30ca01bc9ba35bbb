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

//! HTTP responses, their zero-copy rendering into a write buffer, and the
//! per-worker cached `Date` header.
//!
//! The date cache is grounded on `hyperium`'s `proto::h1::date` module: a
//! fixed-size byte buffer holding the RFC 1123 rendering, refreshed only
//! when the wall-clock second advances. Formatting itself is delegated to
//! the `httpdate` crate rather than hand-rolled, matching the dependency
//! `hyperium` itself reaches for.

use std::borrow::Cow;
use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parser::Status;

use crate::buffer::Buffer;

/// "Sun, 06 Nov 1994 08:49:37 GMT".len()
const DATE_VALUE_LENGTH: usize = 29;

/// Caches the RFC 1123-formatted current time, reformatting at most once per
/// wall-clock second regardless of how many responses are rendered in it.
#[derive(Debug)]
pub struct DateCache {
    bytes: [u8; DATE_VALUE_LENGTH],
    latest_epoch_second: u64,
}

impl DateCache {
    /// Builds a cache already populated with the current time.
    pub fn new() -> Self {
        let mut cache = Self {
            bytes: [0; DATE_VALUE_LENGTH],
            latest_epoch_second: u64::MAX,
        };
        cache.refresh(current_epoch_second());
        cache
    }

    /// Returns the cached RFC 1123 date bytes, refreshing first if the
    /// wall-clock second has advanced since the last call.
    pub fn get(&mut self) -> &[u8; DATE_VALUE_LENGTH] {
        let now = current_epoch_second();
        if now != self.latest_epoch_second {
            self.refresh(now);
        }
        &self.bytes
    }

    fn refresh(&mut self, epoch_second: u64) {
        let formatted = httpdate::fmt_http_date(UNIX_EPOCH + Duration::from_secs(epoch_second));
        debug_assert_eq!(DATE_VALUE_LENGTH, formatted.len());
        self.bytes.copy_from_slice(formatted.as_bytes());
        self.latest_epoch_second = epoch_second;
    }
}

impl Default for DateCache {
    fn default() -> Self {
        Self::new()
    }
}

fn current_epoch_second() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs()
}

/// Headers shared by every response on a worker: `Server:` and the cached
/// `Date:` line, pre-rendered so writing them is a single contiguous copy.
#[derive(Debug)]
pub struct CommonHeaders {
    server_line: &'static str,
    date_cache: DateCache,
}

impl CommonHeaders {
    /// Builds the shared header block for one worker.
    pub fn new() -> Self {
        Self {
            server_line: "Server: rask\r\n",
            date_cache: DateCache::new(),
        }
    }

    /// Upper bound on the rendered size of this block, used to size-check
    /// the write buffer before rendering a response.
    pub fn size(&self) -> usize {
        self.server_line.len() + "Date: ".len() + DATE_VALUE_LENGTH + "\r\n".len()
    }

    /// Writes the block into `buf`.
    fn write_into(&mut self, buf: &mut Buffer) -> std::io::Result<()> {
        buf.write_all(self.server_line.as_bytes())?;
        buf.write_all(b"Date: ")?;
        buf.write_all(self.date_cache.get())?;
        buf.write_all(b"\r\n")
    }
}

impl Default for CommonHeaders {
    fn default() -> Self {
        Self::new()
    }
}

/// An HTTP response: a status, a small set of response-specific headers, and
/// a body. `Content-Length` is never stored in `headers` — it is always
/// derived from `body.len()` at render time, so the two can never disagree.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Response status code and reason phrase.
    pub status: Status,
    /// Response-specific headers, in addition to the worker's common block
    /// and the always-present `Content-Length`.
    pub headers: Vec<(&'static str, Cow<'static, str>)>,
    /// Response body.
    pub body: Cow<'static, [u8]>,
}

impl HttpResponse {
    /// `200 OK` with the given body and no `Content-Type`.
    pub fn ok(body: impl Into<Cow<'static, [u8]>>) -> Self {
        Self {
            status: Status::r#Ok,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// `200 OK` with the given body and a `Content-Type` header.
    pub fn ok_with_content_type(body: impl Into<Cow<'static, [u8]>>, content_type: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status: Status::r#Ok,
            headers: vec![("Content-Type", content_type.into())],
            body: body.into(),
        }
    }

    /// `204 No Content`, sharing the empty-body shape for every call site.
    pub fn no_content() -> Self {
        Self {
            status: Status::NoContent,
            headers: Vec::new(),
            body: Cow::Borrowed(&[]),
        }
    }

    /// `404 Not Found`, optionally with a body and `Content-Type`.
    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            headers: Vec::new(),
            body: Cow::Borrowed(&[]),
        }
    }

    /// `404 Not Found` carrying a body, e.g. an HTML error page.
    pub fn not_found_with_body(body: impl Into<Cow<'static, [u8]>>, content_type: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status: Status::NotFound,
            headers: vec![("Content-Type", content_type.into())],
            body: body.into(),
        }
    }

    /// Upper bound on this response's rendered size, excluding the worker's
    /// common header block (status line + response headers + the derived
    /// `Content-Length` header + terminator + body).
    pub fn output_size(&self) -> usize {
        // "HTTP/1.1 ### Reason\r\n"
        let status_line = 9 + 4 + self.status.reason_phrase().len() + 2;
        let headers: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.len() + 2 + value.len() + 2)
            .sum();
        let content_length = "Content-Length: ".len() + count_digits(self.body.len()) + 2;
        let terminator = 2;
        status_line + headers + content_length + terminator + self.body.len()
    }
}

fn count_digits(mut n: usize) -> usize {
    if n == 0 {
        return 1;
    }
    let mut digits = 0;
    while n > 0 {
        digits += 1;
        n /= 10;
    }
    digits
}

/// Renders `response` into `buffer`, preceded by `common`. Returns `false`
/// without mutating `buffer` if there isn't room for both; the caller is
/// expected to flush and retry.
pub fn render_response(buffer: &mut Buffer, response: &HttpResponse, common: &mut CommonHeaders) -> bool {
    if buffer.remaining_mut() < response.output_size() + common.size() {
        return false;
    }

    // Every write below is now guaranteed to fit; `io::Write` errors here
    // would only indicate a bug in `output_size`/`size`, not exhaustion.
    write!(buffer, "HTTP/1.1 {} {}\r\n", response.status.code(), response.status.reason_phrase())
        .expect("buffer capacity was checked above");
    common.write_into(buffer).expect("buffer capacity was checked above");
    for (name, value) in &response.headers {
        write!(buffer, "{name}: {value}\r\n").expect("buffer capacity was checked above");
    }
    write!(buffer, "Content-Length: {}\r\n", response.body.len()).expect("buffer capacity was checked above");
    buffer.write_all(b"\r\n").expect("buffer capacity was checked above");
    buffer.write_all(&response.body).expect("buffer capacity was checked above");

    true
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn date_cache_produces_rfc1123_length() {
        let mut cache = DateCache::new();
        assert_eq!(DATE_VALUE_LENGTH, cache.get().len());
    }

    #[test]
    fn ok_response_has_no_stored_content_length() {
        let response = HttpResponse::ok(b"hi".as_slice());
        assert!(!response.headers.iter().any(|(n, _)| *n == "Content-Length"));
    }

    #[test]
    fn render_writes_status_line_headers_and_body() {
        let mut buffer = Buffer::new(256);
        let mut common = CommonHeaders::new();
        let response = HttpResponse::ok_with_content_type(b"hi".as_slice(), "text/plain");

        assert!(render_response(&mut buffer, &response, &mut common));

        let rendered = String::from_utf8(buffer.to_vec()).unwrap();
        assert!(rendered.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(rendered.contains("Server: rask\r\n"));
        assert!(rendered.contains("Date: "));
        assert!(rendered.contains("Content-Type: text/plain\r\n"));
        assert!(rendered.contains("Content-Length: 2\r\n"));
        assert!(rendered.ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn render_returns_false_without_mutating_when_undersized() {
        let mut buffer = Buffer::new(8);
        let mut common = CommonHeaders::new();
        let response = HttpResponse::ok(b"a fairly long body that will not fit".as_slice());

        assert!(!render_response(&mut buffer, &response, &mut common));
        assert_eq!(0, buffer.remaining());
    }

    #[test]
    fn no_content_has_empty_body_and_right_status() {
        let response = HttpResponse::no_content();
        assert_eq!(Status::NoContent, response.status);
        assert!(response.body.is_empty());
    }
}
