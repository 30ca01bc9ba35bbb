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

//! Representation of HTTP methods.
use std::fmt::Display;

/// Representation of the requested HTTP Method.
/// [IETF RFC 9110 Section 9](https://www.rfc-editor.org/rfc/rfc9110#section-9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// RFC 9110 9.3.1
    Get,
    /// RFC 9110 9.3.2
    Head,
    /// RFC 9110 9.3.3
    Post,
    /// RFC 9110 9.3.4
    Put,
    /// RFC 9110 9.3.5
    Delete,
    /// RFC 9110 9.3.6
    Connect,
    /// RFC 9110 9.3.7
    Options,
    /// RFC 9110 9.3.8
    Trace,
}

/// A method token did not match any of the methods this parser recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownMethod;

impl TryFrom<&[u8]> for Method {
    type Error = UnknownMethod;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match value {
            b"GET" => Ok(Self::Get),
            b"HEAD" => Ok(Self::Head),
            b"POST" => Ok(Self::Post),
            b"PUT" => Ok(Self::Put),
            b"DELETE" => Ok(Self::Delete),
            b"CONNECT" => Ok(Self::Connect),
            b"OPTIONS" => Ok(Self::Options),
            b"TRACE" => Ok(Self::Trace),
            _ => Err(UnknownMethod),
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
        })
    }
}

#[cfg(test)]
mod test {
    use super::Method;

    #[test]
    fn try_from_recognizes_all_methods() {
        assert_eq!(Ok(Method::Get), Method::try_from(b"GET".as_slice()));
        assert_eq!(Ok(Method::Head), Method::try_from(b"HEAD".as_slice()));
        assert_eq!(Ok(Method::Post), Method::try_from(b"POST".as_slice()));
        assert_eq!(Ok(Method::Put), Method::try_from(b"PUT".as_slice()));
        assert_eq!(Ok(Method::Delete), Method::try_from(b"DELETE".as_slice()));
        assert_eq!(Ok(Method::Connect), Method::try_from(b"CONNECT".as_slice()));
        assert_eq!(Ok(Method::Options), Method::try_from(b"OPTIONS".as_slice()));
        assert_eq!(Ok(Method::Trace), Method::try_from(b"TRACE".as_slice()));
    }

    #[test]
    fn try_from_rejects_unknown_method() {
        assert!(Method::try_from(b"PATCH".as_slice()).is_err());
    }

    #[test]
    fn display_round_trips_through_try_from() {
        for m in [
            Method::Get,
            Method::Head,
            Method::Post,
            Method::Put,
            Method::Delete,
            Method::Connect,
            Method::Options,
            Method::Trace,
        ] {
            let rendered = m.to_string();
            assert_eq!(Ok(m), Method::try_from(rendered.as_bytes()));
        }
    }
}
