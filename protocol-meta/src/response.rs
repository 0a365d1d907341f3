//! Meta reply parsing.
//!
//! A reply is either a terminal line (`HD`, `EN`, `NF`, `NS`, `EX`, or one
//! of the error lines) or a value header `VA <size> <flag>...\r\n` followed
//! by `<size>` payload bytes and a trailing CRLF. [`ResponseLine`] is the
//! parsed header line; [`Response`] is the fully assembled reply once any
//! payload has been read.

use bytes::Bytes;

use crate::error::ParseError;
use crate::flags::{parse_u64, ResponseFlags};

/// A parsed reply header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseLine {
    /// `VA <size> <flag>...` - a value header; `size` payload bytes follow.
    Value { size: usize, flags: ResponseFlags },
    /// `HD <flag>...` - success without a payload.
    Success(ResponseFlags),
    /// `EN` or `NF` - miss / not found.
    Miss,
    /// `NS` - not stored (mode precondition failed).
    NotStored,
    /// `EX` - CAS token mismatch.
    Conflict,
    /// `ERROR` - the server did not understand the command.
    Error,
    /// `CLIENT_ERROR <msg>` - the command was malformed.
    ClientError(String),
    /// `SERVER_ERROR <msg>` - the server failed to process the command.
    ServerError(String),
}

impl ResponseLine {
    /// Parse one reply line from a buffer.
    ///
    /// Returns the parsed line and the number of bytes consumed, including
    /// the CRLF. Returns [`ParseError::Incomplete`] when no full line is
    /// buffered yet.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ParseError> {
        let line_end = find_crlf(data).ok_or(ParseError::Incomplete)?;
        let line = Self::parse_line(&data[..line_end])?;
        Ok((line, line_end + 2))
    }

    /// Parse one reply line, without its CRLF terminator.
    pub fn parse_line(line: &[u8]) -> Result<Self, ParseError> {
        if let Some(rest) = line.strip_prefix(b"VA ") {
            let (size, flag_tokens) = match rest.iter().position(|&b| b == b' ') {
                Some(space) => (&rest[..space], &rest[space + 1..]),
                None => (rest, &b""[..]),
            };
            let size = parse_u64(size)? as usize;
            let flags = ResponseFlags::parse(flag_tokens)?;
            return Ok(ResponseLine::Value { size, flags });
        }
        if line == b"HD" {
            return Ok(ResponseLine::Success(ResponseFlags::default()));
        }
        if let Some(rest) = line.strip_prefix(b"HD ") {
            return Ok(ResponseLine::Success(ResponseFlags::parse(rest)?));
        }
        if line == b"EN" || line == b"NF" {
            return Ok(ResponseLine::Miss);
        }
        if line == b"NS" {
            return Ok(ResponseLine::NotStored);
        }
        if line == b"EX" {
            return Ok(ResponseLine::Conflict);
        }
        if line == b"ERROR" {
            return Ok(ResponseLine::Error);
        }
        if let Some(msg) = line.strip_prefix(b"CLIENT_ERROR ") {
            return Ok(ResponseLine::ClientError(lossy(msg)));
        }
        if let Some(msg) = line.strip_prefix(b"SERVER_ERROR ") {
            return Ok(ResponseLine::ServerError(lossy(msg)));
        }
        Err(ParseError::UnknownResponse)
    }
}

/// A fully assembled meta reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The key was absent (or deleted-and-absent for `md`).
    Miss,
    /// A value, with the reply flags and the payload bytes.
    Value { flags: ResponseFlags, data: Bytes },
    /// Success without a payload.
    Success(ResponseFlags),
    /// The storage mode's precondition failed.
    NotStored,
    /// The CAS token did not match.
    Conflict,
}

impl Response {
    /// Returns true for `Success` and `Value`.
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success(_) | Response::Value { .. })
    }

    /// Returns true for `Miss`.
    #[inline]
    pub fn is_miss(&self) -> bool {
        matches!(self, Response::Miss)
    }

    /// The reply flags, for variants that carry them.
    #[inline]
    pub fn flags(&self) -> Option<&ResponseFlags> {
        match self {
            Response::Value { flags, .. } | Response::Success(flags) => Some(flags),
            _ => None,
        }
    }
}

/// Find the first CRLF in `data`, returning the index of the `\r`.
pub(crate) fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

fn lossy(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}
