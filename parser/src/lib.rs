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
#![doc(test(attr(deny(warnings))))]

//! Byte-level HTTP/1.1 request parsing, plus the shared method, version, and
//! status vocabulary used by both requests and responses.

pub mod h1;
pub mod method;
pub mod raw_request;
pub mod status;
pub mod version;

pub use method::Method;
pub use status::Status;
pub use version::Version;

/// A single HTTP header as a name/value pair borrowed from the source buffer.
///
/// The value is kept as raw bytes rather than `str`, since RFC 9110 only
/// requires header field values to be ASCII or opaque octets (e.g. for
/// non-ASCII `obs-text` historically permitted by RFC 7230).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header<'a> {
    /// Header field name.
    pub name: &'a str,
    /// Header field value, unparsed.
    pub value: &'a [u8],
}
