//! Server address handling.
//!
//! One configured address yields both the HTTP base for the REST endpoints
//! and the live-stream URL. The stream uses `wss://` exactly when the HTTP
//! side is `https://`.

use std::fmt;
use std::str::FromStr;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::error::{Error, Result};

/// Characters left alone when encoding a URI component.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Default server address.
pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    secure: bool,
    authority: String,
}

impl Endpoint {
    /// Parse `http://host[:port]`, `https://...`, `ws://...`, `wss://...` or a
    /// bare `host[:port]` (taken as plain HTTP).
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (secure, rest) = if let Some(r) = s.strip_prefix("https://") {
            (true, r)
        } else if let Some(r) = s.strip_prefix("wss://") {
            (true, r)
        } else if let Some(r) = s.strip_prefix("http://") {
            (false, r)
        } else if let Some(r) = s.strip_prefix("ws://") {
            (false, r)
        } else if s.contains("://") {
            return Err(Error::InvalidEndpoint(format!("unsupported scheme in {s:?}")));
        } else {
            (false, s)
        };

        let authority = rest.trim_end_matches('/');
        if authority.is_empty() {
            return Err(Error::InvalidEndpoint(format!("missing host in {s:?}")));
        }
        if authority.contains(['/', '?', '#', ' ']) {
            return Err(Error::InvalidEndpoint(format!(
                "expected scheme://host[:port], got {s:?}"
            )));
        }
        Ok(Self {
            secure,
            authority: authority.to_string(),
        })
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Absolute HTTP URL for `path` (which starts with `/`).
    pub fn http_url(&self, path: &str) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}{path}", self.authority)
    }

    /// Live-stream URL carrying the credential as a query parameter.
    pub fn live_url(&self, token: &str) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!(
            "{scheme}://{}/ws?token={}",
            self.authority,
            utf8_percent_encode(token, COMPONENT)
        )
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            secure: false,
            authority: "127.0.0.1:8000".to_string(),
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.http_url(""))
    }
}
