//! Error types for meta protocol parsing.

/// Error type for meta protocol parsing operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Need more data to complete parsing.
    /// This is not a fatal error - the caller should buffer more data and retry.
    #[error("incomplete data")]
    Incomplete,

    /// Invalid protocol format.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// Invalid number format in a flag token or size field.
    #[error("invalid number")]
    InvalidNumber,

    /// The reply code is not one the meta protocol defines.
    #[error("unknown response")]
    UnknownResponse,
}

impl ParseError {
    /// Returns true if this error indicates more data is needed.
    #[inline]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ParseError::Incomplete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_incomplete() {
        assert!(ParseError::Incomplete.is_incomplete());
        assert!(!ParseError::Protocol("test").is_incomplete());
        assert!(!ParseError::InvalidNumber.is_incomplete());
        assert!(!ParseError::UnknownResponse.is_incomplete());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", ParseError::Incomplete), "incomplete data");
        assert_eq!(
            format!("{}", ParseError::Protocol("bad flag")),
            "protocol error: bad flag"
        );
        assert_eq!(format!("{}", ParseError::InvalidNumber), "invalid number");
    }
}
