//! Client-side opening handshake.

pub mod client;
pub mod machine;

use std::str::from_utf8;

use data_encoding::BASE64;
use sha1::{Digest, Sha1};

use crate::error::Result;

/// Limit on the number of header lines in the server response.
pub(crate) const MAX_HEADERS: usize = 124;

/// Derive the `Sec-WebSocket-Accept` value for a `Sec-WebSocket-Key`.
///
/// This is the value the server must echo back for the upgrade to be
/// accepted.
pub fn derive_accept_key(request_key: &[u8]) -> String {
    // ... the value is constructed by concatenating /key/ with the string
    // "258EAFA5-E914-47DA-95CA-C5AB0DC85B11" (RFC 6455)
    const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
    let mut sha1 = Sha1::default();
    sha1.update(request_key);
    sha1.update(WS_GUID);
    BASE64.encode(&sha1.finalize())
}

/// HTTP response headers.
#[derive(Debug)]
pub struct Headers {
    data: Vec<(String, Vec<u8>)>,
}

impl Headers {
    /// Get the first header with the given name, if any.
    pub fn find_first(&self, name: &str) -> Option<&[u8]> {
        self.data
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// Check if the given header has exactly the given value.
    pub fn header_is(&self, name: &str, value: &str) -> bool {
        self.find_first(name).map_or(false, |v| v == value.as_bytes())
    }

    /// Check if the given header has the given value, ASCII
    /// case-insensitively.
    pub fn header_is_ignore_case(&self, name: &str, value: &str) -> bool {
        self.find_first(name)
            .and_then(|v| from_utf8(v).ok())
            .map_or(false, |v| v.eq_ignore_ascii_case(value))
    }

    /// Check if the given header's comma-separated token list contains the
    /// token, ASCII case-insensitively. The `Connection` header is a token
    /// list, not a single value.
    pub fn header_contains_token(&self, name: &str, token: &str) -> bool {
        self.find_first(name)
            .and_then(|v| from_utf8(v).ok())
            .map_or(false, |v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
    }

    pub(crate) fn from_httparse(raw: &[httparse::Header<'_>]) -> Result<Self> {
        Ok(Headers {
            data: raw.iter().map(|h| (h.name.to_owned(), h.value.to_vec())).collect(),
        })
    }
}
