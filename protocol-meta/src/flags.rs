//! Request and response flag records.
//!
//! Meta commands carry their options as single-letter flag tokens, some with
//! an argument (`T30`, `C42`, `Ofoo`). [`RequestFlags`] enumerates every
//! option the client can put on the wire; the command encoder decides which
//! fields apply to which verb. [`ResponseFlags`] is the parsed view of the
//! tokens a server attaches to `HD`/`VA` replies.

use bytes::Bytes;

use crate::error::ParseError;

/// Storage mode for `ms` (meta set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetMode {
    /// Unconditional store (`MS`).
    #[default]
    Set,
    /// Store only if absent (`ME`).
    Add,
    /// Store only if present (`MR`).
    Replace,
    /// Append to an existing value (`MA`).
    Append,
    /// Prepend to an existing value (`MP`).
    Prepend,
}

impl SetMode {
    #[inline]
    pub(crate) fn token(self) -> u8 {
        match self {
            SetMode::Set => b'S',
            SetMode::Add => b'E',
            SetMode::Replace => b'R',
            SetMode::Append => b'A',
            SetMode::Prepend => b'P',
        }
    }
}

/// Direction for `ma` (meta arithmetic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArithmeticMode {
    /// Increment (`MI`).
    #[default]
    Incr,
    /// Decrement (`MD`).
    Decr,
}

impl ArithmeticMode {
    #[inline]
    pub(crate) fn token(self) -> u8 {
        match self {
            ArithmeticMode::Incr => b'I',
            ArithmeticMode::Decr => b'D',
        }
    }
}

/// Options attached to an outgoing meta command.
///
/// The default requests the value back (`v`) and nothing else; the command
/// encoder only emits the tokens meaningful for its verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFlags {
    /// `q` - quiet mode; the executor short-circuits with a synthetic
    /// success instead of reading a reply.
    pub no_reply: bool,
    /// `v` - return the value payload (reads and arithmetic).
    pub return_value: bool,
    /// `f` - return the client flag.
    pub return_client_flag: bool,
    /// `c` - return the CAS token.
    pub return_cas_token: bool,
    /// `t` - return the remaining TTL.
    pub return_ttl: bool,
    /// `s` - return the stored size.
    pub return_size: bool,
    /// `l` - return the time since last access.
    pub return_last_access: bool,
    /// `h` - return whether the item was fetched before.
    pub return_fetched: bool,
    /// `k` - return the key.
    pub return_key: bool,
    /// `u` - do not bump the item in the LRU.
    pub no_update_lru: bool,
    /// `I` - mark stale: on delete the item is invalidated instead of
    /// removed; on set a CAS mismatch stores the value as stale.
    pub mark_stale: bool,
    /// `T<ttl>` - set/refresh the TTL (on delete combined with `mark_stale`
    /// this becomes `I<ttl>`).
    pub cache_ttl: Option<u32>,
    /// `R<ttl>` - early-recache window: when the remaining TTL drops below
    /// this, one reader wins the refresh.
    pub recache_ttl: Option<u32>,
    /// `N<ttl>` - vivify: on miss, create a placeholder with this TTL and
    /// hand the lease to the first reader.
    pub vivify_on_miss_ttl: Option<u32>,
    /// `F<flag>` - client flag stored with the value (sets only).
    pub client_flag: Option<u32>,
    /// `J<value>` - initial value when arithmetic auto-vivifies.
    pub ma_initial_value: Option<u64>,
    /// `D<value>` - arithmetic delta.
    pub ma_delta_value: Option<u64>,
    /// `C<token>` - compare-and-swap token.
    pub cas_token: Option<u64>,
    /// `O<token>` - opaque token echoed back in the reply.
    pub opaque: Option<Bytes>,
    /// `M<mode>` for writes.
    pub set_mode: SetMode,
    /// `M<mode>` for arithmetic.
    pub arithmetic_mode: ArithmeticMode,
}

impl Default for RequestFlags {
    fn default() -> Self {
        RequestFlags {
            no_reply: false,
            return_value: true,
            return_client_flag: false,
            return_cas_token: false,
            return_ttl: false,
            return_size: false,
            return_last_access: false,
            return_fetched: false,
            return_key: false,
            no_update_lru: false,
            mark_stale: false,
            cache_ttl: None,
            recache_ttl: None,
            vivify_on_miss_ttl: None,
            client_flag: None,
            ma_initial_value: None,
            ma_delta_value: None,
            cas_token: None,
            opaque: None,
            set_mode: SetMode::Set,
            arithmetic_mode: ArithmeticMode::Incr,
        }
    }
}

impl RequestFlags {
    /// Flags with nothing set, for commands that should carry no tokens at
    /// all (e.g. a touch-only `mg`).
    pub fn none() -> Self {
        RequestFlags {
            return_value: false,
            ..Default::default()
        }
    }
}

/// Flag tokens parsed from an `HD` or `VA` reply line.
///
/// Unknown tokens are skipped without disturbing the rest of the line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseFlags {
    /// `c<token>` - CAS token.
    pub cas_token: Option<u64>,
    /// `h<0|1>` - item had been fetched before this request.
    pub fetched: Option<bool>,
    /// `l<seconds>` - time since last access.
    pub last_access: Option<u64>,
    /// `t<seconds>` - remaining TTL; -1 means the item never expires.
    pub ttl: Option<i64>,
    /// `f<flag>` - client flag stored with the value.
    pub client_flag: Option<u32>,
    /// `W` (won) / `Z` (lost) - recache/vivify lease outcome.
    pub win: Option<bool>,
    /// `X` - the value is stale.
    pub stale: bool,
    /// `s<size>` - actual stored size.
    pub real_size: Option<u64>,
    /// `O<token>` - opaque token echoed from the request.
    pub opaque: Option<Bytes>,
    /// `k<key>` - key, when `k` was requested.
    pub key: Option<Bytes>,
}

impl ResponseFlags {
    /// Parse the flag region of a reply line (everything after the reply
    /// code and, for `VA`, the size).
    pub fn parse(tokens: &[u8]) -> Result<Self, ParseError> {
        let mut flags = ResponseFlags::default();
        for token in tokens.split(|&b| b == b' ') {
            if token.is_empty() {
                continue;
            }
            let arg = &token[1..];
            match token[0] {
                b'c' => flags.cas_token = Some(parse_u64(arg)?),
                b'h' => flags.fetched = Some(parse_u64(arg)? != 0),
                b'l' => flags.last_access = Some(parse_u64(arg)?),
                b't' => flags.ttl = Some(parse_i64(arg)?),
                b'f' => flags.client_flag = Some(parse_u64(arg)? as u32),
                b'W' => flags.win = Some(true),
                b'Z' => flags.win = Some(false),
                b'X' => flags.stale = true,
                b's' => flags.real_size = Some(parse_u64(arg)?),
                b'O' => flags.opaque = Some(Bytes::copy_from_slice(arg)),
                b'k' => flags.key = Some(Bytes::copy_from_slice(arg)),
                _ => {}
            }
        }
        Ok(flags)
    }
}

pub(crate) fn parse_u64(data: &[u8]) -> Result<u64, ParseError> {
    if data.is_empty() {
        return Err(ParseError::InvalidNumber);
    }
    let mut value: u64 = 0;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(ParseError::InvalidNumber);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(b - b'0')))
            .ok_or(ParseError::InvalidNumber)?;
    }
    Ok(value)
}

pub(crate) fn parse_i64(data: &[u8]) -> Result<i64, ParseError> {
    if let Some(rest) = data.strip_prefix(b"-") {
        let magnitude = parse_u64(rest)?;
        i64::try_from(magnitude)
            .map(|v| -v)
            .map_err(|_| ParseError::InvalidNumber)
    } else {
        i64::try_from(parse_u64(data)?).map_err(|_| ParseError::InvalidNumber)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_flags() {
        let flags = ResponseFlags::parse(b"").unwrap();
        assert_eq!(flags, ResponseFlags::default());
    }

    #[test]
    fn parse_cas_and_client_flag() {
        let flags = ResponseFlags::parse(b"c42 f8").unwrap();
        assert_eq!(flags.cas_token, Some(42));
        assert_eq!(flags.client_flag, Some(8));
    }

    #[test]
    fn parse_win_lose_stale() {
        let flags = ResponseFlags::parse(b"W").unwrap();
        assert_eq!(flags.win, Some(true));
        assert!(!flags.stale);

        let flags = ResponseFlags::parse(b"Z X").unwrap();
        assert_eq!(flags.win, Some(false));
        assert!(flags.stale);
    }

    #[test]
    fn parse_immortal_ttl() {
        let flags = ResponseFlags::parse(b"t-1").unwrap();
        assert_eq!(flags.ttl, Some(-1));
        let flags = ResponseFlags::parse(b"t30").unwrap();
        assert_eq!(flags.ttl, Some(30));
    }

    #[test]
    fn parse_fetched() {
        assert_eq!(ResponseFlags::parse(b"h1").unwrap().fetched, Some(true));
        assert_eq!(ResponseFlags::parse(b"h0").unwrap().fetched, Some(false));
    }

    #[test]
    fn parse_opaque_and_key() {
        let flags = ResponseFlags::parse(b"Oabc ksome-key").unwrap();
        assert_eq!(flags.opaque.as_deref(), Some(&b"abc"[..]));
        assert_eq!(flags.key.as_deref(), Some(&b"some-key"[..]));
    }

    #[test]
    fn unknown_flags_are_skipped() {
        let flags = ResponseFlags::parse(b"Q9 c7 e3").unwrap();
        assert_eq!(flags.cas_token, Some(7));
    }

    #[test]
    fn bad_number_is_an_error() {
        assert_eq!(
            ResponseFlags::parse(b"cxyz"),
            Err(ParseError::InvalidNumber)
        );
        assert_eq!(ResponseFlags::parse(b"t"), Err(ParseError::InvalidNumber));
    }

    #[test]
    fn default_request_flags_return_value_only() {
        let flags = RequestFlags::default();
        assert!(flags.return_value);
        assert!(!flags.no_reply);
        assert!(!RequestFlags::none().return_value);
    }
}
