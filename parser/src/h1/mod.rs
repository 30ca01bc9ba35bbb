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

//! H1 parser implementation.

use core::fmt::Display;

pub mod request;
mod tokens;

/// Represents possible failures while parsing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Invalid byte in method.
    Method,
    /// Invalid byte in target.
    Target,
    /// Invalid or unsupported HTTP version.
    Version,
    /// Invalid byte in header name.
    HeaderName,
    /// Invalid byte in header value.
    HeaderValue,
    /// Invalid or missing new line.
    NewLine,
    /// More headers were sent than this parser will buffer for one request.
    TooManyHeaders,
}

impl ParseError {
    fn description_str(&self) -> &'static str {
        match *self {
            ParseError::Method => "invalid token in method",
            ParseError::Target => "invalid token in request-target",
            ParseError::Version => "invalid or unsupported HTTP version",
            ParseError::HeaderName => "invalid token in header name",
            ParseError::HeaderValue => "invalid token in header value",
            ParseError::NewLine => "invalid or missing new line",
            ParseError::TooManyHeaders => "too many headers",
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description_str())
    }
}

impl std::error::Error for ParseError {}

/// Result of attempting to parse a request out of a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A full request line, headers, and terminating blank line were found.
    /// The value is the number of leading bytes of the input buffer consumed,
    /// which may be less than the buffer's length when a pipelined request
    /// follows.
    Complete(usize),
    /// The buffer ends before a full request could be recognized; the
    /// caller should read more bytes and retry with the extended buffer.
    Incomplete,
}

pub(crate) type ParseResult<T> = std::result::Result<T, ParseError>;

/// Internal signal distinguishing "ran out of buffer" from a real parse error,
/// so callers can tell a short read from a malformed request.
enum Signal {
    Incomplete,
    Malformed(ParseError),
}

impl From<ParseError> for Signal {
    fn from(err: ParseError) -> Self {
        Signal::Malformed(err)
    }
}

type StepResult<T> = std::result::Result<T, Signal>;
