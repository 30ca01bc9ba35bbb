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

//! Http Status Codes
//! [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)

use std::fmt::Display;

/// Http Status Codes
/// [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 15.2.1
    Continue = 100,
    /// 15.2.2
    SwitchingProtocols = 101,
    /// 15.3.1
    r#Ok = 200,
    /// 15.3.2
    Created = 201,
    /// 15.3.3
    Accepted = 202,
    /// 15.3.4
    NonAuthoritativeInformation = 203,
    /// 15.3.5
    NoContent = 204,
    /// 15.3.6
    ResetContent = 205,
    /// 15.3.7
    PartialContent = 206,
    /// 15.4.1
    MultipleChoices = 300,
    /// 15.4.2
    MovedPermanently = 301,
    /// 15.4.3
    Found = 302,
    /// 15.4.4
    SeeOther = 303,
    /// 15.4.5
    NotModified = 304,
    /// 15.4.6
    UseProxy = 305,
    /// 15.4.8
    TemporaryRedirect = 307,
    /// 15.4.9
    PermanentRedirect = 308,
    /// 15.5.1
    BadRequest = 400,
    /// 15.5.2
    Unauthorized = 401,
    /// 15.5.3
    PaymentRequired = 402,
    /// 15.5.4
    Forbidden = 403,
    /// 15.5.5
    NotFound = 404,
    /// 15.5.6
    MethodNotAllowed = 405,
    /// 15.5.7
    NotAcceptable = 406,
    /// 15.5.8
    ProxyAuthenticationRequired = 407,
    /// 15.5.9
    RequestTimeout = 408,
    /// 15.5.10
    Conflict = 409,
    /// 15.5.11
    Gone = 410,
    /// 15.5.12
    LengthRequired = 411,
    /// 15.5.13
    PreconditionFailed = 412,
    /// 15.5.14
    ContentTooLarge = 413,
    /// 15.5.15
    UriTooLong = 414,
    /// 15.5.16
    UnsupportedMediaType = 415,
    /// 15.5.17
    RangeNotSatisfiable = 416,
    /// 15.5.18
    ExpectationFailed = 417,
    /// 15.5.20
    MisdirectedRequest = 421,
    /// 15.5.21
    UnprocessableContent = 422,
    /// 15.5.22
    UpgradeRequired = 426,
    /// 15.6.1
    InternalServerError = 500,
    /// 15.6.2
    NotImplemented = 501,
    /// 15.6.3
    BadGateway = 502,
    /// 15.6.4
    ServiceUnavailable = 503,
    /// 15.6.5
    GatewayTimeout = 504,
    /// 15.6.6
    HTTPVersionNotSupported = 505,
}

impl Status {
    /// The numeric status code, e.g. `404`.
    #[inline]
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// The standard reason phrase associated with this status, as would
    /// appear on a status line (e.g. `"Not Found"` for 404).
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            Self::Continue => "Continue",
            Self::SwitchingProtocols => "Switching Protocols",
            Self::r#Ok => "OK",
            Self::Created => "Created",
            Self::Accepted => "Accepted",
            Self::NonAuthoritativeInformation => "Non-Authoritative Information",
            Self::NoContent => "No Content",
            Self::ResetContent => "Reset Content",
            Self::PartialContent => "Partial Content",
            Self::MultipleChoices => "Multiple Choices",
            Self::MovedPermanently => "Moved Permanently",
            Self::Found => "Found",
            Self::SeeOther => "See Other",
            Self::NotModified => "Not Modified",
            Self::UseProxy => "Use Proxy",
            Self::TemporaryRedirect => "Temporary Redirect",
            Self::PermanentRedirect => "Permanent Redirect",
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::PaymentRequired => "Payment Required",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::NotAcceptable => "Not Acceptable",
            Self::ProxyAuthenticationRequired => "Proxy Authentication Required",
            Self::RequestTimeout => "Request Timeout",
            Self::Conflict => "Conflict",
            Self::Gone => "Gone",
            Self::LengthRequired => "Length Required",
            Self::PreconditionFailed => "Precondition Failed",
            Self::ContentTooLarge => "Content Too Large",
            Self::UriTooLong => "URI Too Long",
            Self::UnsupportedMediaType => "Unsupported Media Type",
            Self::RangeNotSatisfiable => "Range Not Satisfiable",
            Self::ExpectationFailed => "Expectation Failed",
            Self::MisdirectedRequest => "Misdirected Request",
            Self::UnprocessableContent => "Unprocessable Content",
            Self::UpgradeRequired => "Upgrade Required",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::BadGateway => "Bad Gateway",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::GatewayTimeout => "Gateway Timeout",
            Self::HTTPVersionNotSupported => "HTTP Version Not Supported",
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}", self.code()))
    }
}

#[cfg(test)]
mod test {
    use super::Status;

    #[test]
    fn code_returns_numeric_value() {
        assert_eq!(404, Status::NotFound.code());
        assert_eq!(200, Status::r#Ok.code());
    }

    #[test]
    fn reason_phrase_matches_rfc_text() {
        assert_eq!("OK", Status::r#Ok.reason_phrase());
        assert_eq!("Not Found", Status::NotFound.reason_phrase());
        assert_eq!("Internal Server Error", Status::InternalServerError.reason_phrase());
    }

    #[test]
    fn display_writes_numeric_code() {
        assert_eq!("404", Status::NotFound.to_string());
    }
}
