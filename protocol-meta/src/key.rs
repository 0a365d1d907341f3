//! Cache keys and their wire representation.
//!
//! A [`Key`] carries a *storage token* (what the server sees) and an optional
//! *routing token* (what the hash ring sees), so related keys can be
//! colocated on one server by sharing a routing token. Keys that are not
//! plain printable ASCII, contain whitespace, or exceed the protocol limit
//! are transmitted base64-encoded together with the `b` flag; the server
//! decodes them back to the raw bytes.

use std::borrow::Cow;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;

/// Maximum length of a key transmitted raw. Longer keys go base64.
pub const MAX_RAW_KEY_LEN: usize = 250;

/// A cache key.
///
/// Construct from text with [`Key::new`] or from arbitrary bytes with
/// [`Key::from_bytes`]. The routing token defaults to the storage token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    storage: Bytes,
    routing: Option<Bytes>,
    domain: Option<String>,
}

impl Key {
    /// Create a key from text.
    pub fn new(key: impl Into<String>) -> Self {
        Key {
            storage: Bytes::from(key.into()),
            routing: None,
            domain: None,
        }
    }

    /// Create a key from raw bytes. Non-ASCII bytes are fine; the key will
    /// be base64-encoded on the wire.
    pub fn from_bytes(key: impl Into<Bytes>) -> Self {
        Key {
            storage: key.into(),
            routing: None,
            domain: None,
        }
    }

    /// Use a separate routing token for server selection.
    pub fn with_routing(mut self, routing: impl Into<Bytes>) -> Self {
        self.routing = Some(routing.into());
        self
    }

    /// Tag this key with a domain, used for per-domain codec selection and
    /// stats labeling.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// The bytes sent to the server (before any base64 encoding).
    #[inline]
    pub fn storage_token(&self) -> &[u8] {
        &self.storage
    }

    /// The bytes hashed for server selection.
    #[inline]
    pub fn routing_token(&self) -> &[u8] {
        self.routing.as_deref().unwrap_or(&self.storage)
    }

    /// The domain tag, if any.
    #[inline]
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// The wire form of the storage token and whether it is base64-encoded
    /// (requiring the `b` flag).
    pub fn wire_token(&self) -> (Cow<'_, [u8]>, bool) {
        if is_raw_safe(&self.storage) {
            (Cow::Borrowed(&self.storage[..]), false)
        } else {
            (Cow::Owned(BASE64.encode(&self.storage).into_bytes()), true)
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.storage))
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Key::new(key)
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key::new(key)
    }
}

/// A key can go raw on the wire only if every byte is printable ASCII with
/// no whitespace and the length is within the protocol limit.
fn is_raw_safe(key: &[u8]) -> bool {
    key.len() <= MAX_RAW_KEY_LEN && key.iter().all(|&b| (0x21..0x7f).contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_ascii_goes_raw() {
        let key = Key::new("foo");
        let (wire, binary) = key.wire_token();
        assert_eq!(&wire[..], b"foo");
        assert!(!binary);
    }

    #[test]
    fn whitespace_goes_base64() {
        let key = Key::new("has space");
        let (wire, binary) = key.wire_token();
        assert!(binary);
        assert_eq!(&wire[..], BASE64.encode(b"has space").into_bytes());
    }

    #[test]
    fn newline_goes_base64() {
        let (_, binary) = Key::new("a\r\nb").wire_token();
        assert!(binary);
    }

    #[test]
    fn non_ascii_goes_base64() {
        let key = Key::new("\u{1f37a}");
        let (wire, binary) = key.wire_token();
        assert!(binary);
        assert_eq!(&wire[..], b"8J+Nug==");
    }

    #[test]
    fn long_key_goes_base64() {
        let key = Key::new("x".repeat(MAX_RAW_KEY_LEN + 1));
        let (_, binary) = key.wire_token();
        assert!(binary);
    }

    #[test]
    fn max_length_raw_key_stays_raw() {
        let key = Key::new("x".repeat(MAX_RAW_KEY_LEN));
        let (_, binary) = key.wire_token();
        assert!(!binary);
    }

    #[test]
    fn routing_token_defaults_to_storage() {
        let key = Key::new("foo");
        assert_eq!(key.routing_token(), b"foo");
        let key = Key::new("foo:1").with_routing("foo");
        assert_eq!(key.routing_token(), b"foo");
        assert_eq!(key.storage_token(), b"foo:1");
    }

    #[test]
    fn domain_tag() {
        let key = Key::new("foo").with_domain("users");
        assert_eq!(key.domain(), Some("users"));
        assert_eq!(Key::new("foo").domain(), None);
    }
}
