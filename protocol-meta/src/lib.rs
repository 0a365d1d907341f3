//! Memcache "meta" text protocol codec.
//!
//! The meta protocol is line-oriented: a request is one line,
//! `<verb> <key> <flag>...\r\n`, followed by a value payload for writes; a
//! reply is a terminal line (`HD`, `EN`, `NF`, `NS`, `EX`, or an error
//! line) or a value header `VA <size> <flag>...\r\n` followed by the
//! payload. Flags are single ASCII letters, some carrying a token
//! (`T30`, `C42`, `Ofoo`).
//!
//! This crate is transport-agnostic: requests encode into a caller-supplied
//! buffer and reply lines parse from a byte slice, returning
//! [`ParseError::Incomplete`] when more data is needed so callers can drive
//! their own buffering loop.
//!
//! # Example
//!
//! ```
//! use protocol_meta::{Command, Key, Request, RequestFlags, ResponseLine};
//!
//! // Encode a get.
//! let key = Key::new("hello");
//! let flags = RequestFlags::default();
//! let mut buf = Vec::new();
//! Request { command: Command::Get, key: &key, value: None, flags: &flags }
//!     .encode(&mut buf);
//! assert_eq!(buf, b"mg hello v\r\n");
//!
//! // Parse the reply header; the payload is read separately.
//! let (line, consumed) = ResponseLine::parse(b"VA 5\r\nworld\r\n").unwrap();
//! assert_eq!(consumed, 6);
//! ```

mod error;
mod flags;
mod key;
mod request;
mod response;

pub use error::ParseError;
pub use flags::{ArithmeticMode, RequestFlags, ResponseFlags, SetMode};
pub use key::{Key, MAX_RAW_KEY_LEN};
pub use request::{Command, Request};
pub use response::{Response, ResponseLine};
