//! Client error taxonomy.
//!
//! Four of these kinds - `Protocol`, `Connection`, `ServerMarkedDown` and
//! `Server` - reduce to a single "server error" signal per call: when the
//! client (or the per-call [`FailureHandling`](crate::FailureHandling))
//! silences server errors, reads surface a miss and writes surface `false`
//! instead. CAS conflicts and `NS` replies are ordinary results, never
//! errors.

use std::io;

use protocol_meta::ParseError;

/// Errors returned by client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A reply did not parse. The connection is poisoned.
    #[error("protocol error on {server}: {source}")]
    Protocol {
        server: String,
        #[source]
        source: ParseError,
    },

    /// Socket-level failure: connect, read, write, or timeout. The
    /// connection is poisoned and the pool marks the server down on release.
    #[error("connection error on {server}: {source}")]
    Connection {
        server: String,
        #[source]
        source: io::Error,
    },

    /// The pool refused to issue a connection because the server is inside
    /// an active mark-down window.
    #[error("server {server} is marked down")]
    ServerMarkedDown { server: String },

    /// The server answered with an error line for this request.
    #[error("server error from {server}: {message}")]
    Server { server: String, message: String },

    /// A typed getter found a value of a different type and
    /// `error_on_type_mismatch` was set.
    #[error("type mismatch for key {key}: expected {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    /// A reply had a shape that is impossible for the verb that was sent.
    #[error("unexpected response")]
    UnexpectedResponse,

    /// The caller passed an unusable argument or policy.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl Error {
    /// Returns true for the kinds that reduce to the per-call "server
    /// error" signal.
    #[inline]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Error::Protocol { .. }
                | Error::Connection { .. }
                | Error::ServerMarkedDown { .. }
                | Error::Server { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_classification() {
        let err = Error::ServerMarkedDown {
            server: "127.0.0.1:11211".into(),
        };
        assert!(err.is_server_error());

        let err = Error::Server {
            server: "127.0.0.1:11211".into(),
            message: "out of memory".into(),
        };
        assert!(err.is_server_error());

        assert!(!Error::UnexpectedResponse.is_server_error());
        assert!(!Error::InvalidArgument("nope").is_server_error());
    }

    #[test]
    fn display_includes_server() {
        let err = Error::ServerMarkedDown {
            server: "10.0.0.1:11211".into(),
        };
        assert_eq!(err.to_string(), "server 10.0.0.1:11211 is marked down");
    }
}
