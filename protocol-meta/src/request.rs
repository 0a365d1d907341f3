//! Client-side request encoding for the meta protocol.
//!
//! A request is a single line, `<verb> <key> <flag>...\r\n`, followed by the
//! value payload for `ms`. Encoding appends to a caller-supplied buffer so a
//! whole logical request (or a pipelined batch of them) lands in one buffer
//! and one write.

use std::io::Write;

use crate::flags::RequestFlags;
use crate::key::Key;

/// The four meta verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `mg` - meta get.
    Get,
    /// `ms` - meta set.
    Set,
    /// `md` - meta delete.
    Delete,
    /// `ma` - meta arithmetic.
    Arithmetic,
}

impl Command {
    #[inline]
    pub fn verb(self) -> &'static [u8] {
        match self {
            Command::Get => b"mg",
            Command::Set => b"ms",
            Command::Delete => b"md",
            Command::Arithmetic => b"ma",
        }
    }
}

/// One encodable meta request.
#[derive(Debug, Clone)]
pub struct Request<'a> {
    pub command: Command,
    pub key: &'a Key,
    /// Payload for `ms`; its length becomes the `S<size>` flag.
    pub value: Option<&'a [u8]>,
    pub flags: &'a RequestFlags,
}

impl Request<'_> {
    /// Append the encoded request (line plus payload) to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let (wire_key, binary) = self.key.wire_token();

        buf.extend_from_slice(self.command.verb());
        buf.push(b' ');
        buf.extend_from_slice(&wire_key);

        match self.command {
            Command::Get => self.encode_get_flags(buf, binary),
            Command::Set => self.encode_set_flags(buf, binary),
            Command::Delete => self.encode_delete_flags(buf, binary),
            Command::Arithmetic => self.encode_arithmetic_flags(buf, binary),
        }

        buf.extend_from_slice(b"\r\n");
        if self.command == Command::Set {
            buf.extend_from_slice(self.value.unwrap_or_default());
            buf.extend_from_slice(b"\r\n");
        }
    }

    fn encode_get_flags(&self, buf: &mut Vec<u8>, binary: bool) {
        let f = self.flags;
        for (set, token) in [
            (f.return_value, b'v'),
            (f.return_client_flag, b'f'),
            (f.return_cas_token, b'c'),
            (f.return_ttl, b't'),
            (f.return_last_access, b'l'),
            (f.return_fetched, b'h'),
            (f.return_key, b'k'),
            (f.return_size, b's'),
            (f.no_update_lru, b'u'),
        ] {
            if set {
                push_flag(buf, token);
            }
        }
        push_int_flag(buf, b'N', f.vivify_on_miss_ttl);
        push_int_flag(buf, b'R', f.recache_ttl);
        push_int_flag(buf, b'T', f.cache_ttl);
        self.encode_common_tail(buf, binary);
    }

    fn encode_set_flags(&self, buf: &mut Vec<u8>, binary: bool) {
        let f = self.flags;
        let size = self.value.map(<[u8]>::len).unwrap_or(0);
        push_flag(buf, b'S');
        write!(buf, "{size}").expect("write to Vec");
        push_int_flag(buf, b'T', f.cache_ttl);
        push_u64_flag(buf, b'C', f.cas_token);
        if let Some(flag) = f.client_flag.filter(|&flag| flag != 0) {
            push_flag(buf, b'F');
            write!(buf, "{flag}").expect("write to Vec");
        }
        push_flag(buf, b'M');
        buf.push(f.set_mode.token());
        if f.mark_stale {
            push_flag(buf, b'I');
        }
        if f.return_cas_token {
            push_flag(buf, b'c');
        }
        self.encode_common_tail(buf, binary);
    }

    fn encode_delete_flags(&self, buf: &mut Vec<u8>, binary: bool) {
        let f = self.flags;
        push_u64_flag(buf, b'C', f.cas_token);
        if f.mark_stale {
            // I<ttl> invalidates instead of deleting; the TTL bounds how
            // long the stale value may be served.
            match f.cache_ttl {
                Some(ttl) => {
                    push_flag(buf, b'I');
                    write!(buf, "{ttl}").expect("write to Vec");
                }
                None => push_flag(buf, b'I'),
            }
        } else {
            push_int_flag(buf, b'T', f.cache_ttl);
        }
        self.encode_common_tail(buf, binary);
    }

    fn encode_arithmetic_flags(&self, buf: &mut Vec<u8>, binary: bool) {
        let f = self.flags;
        push_u64_flag(buf, b'D', f.ma_delta_value);
        push_u64_flag(buf, b'J', f.ma_initial_value);
        push_int_flag(buf, b'N', f.vivify_on_miss_ttl);
        push_int_flag(buf, b'T', f.cache_ttl);
        push_u64_flag(buf, b'C', f.cas_token);
        push_flag(buf, b'M');
        buf.push(f.arithmetic_mode.token());
        if f.return_value {
            push_flag(buf, b'v');
        }
        self.encode_common_tail(buf, binary);
    }

    fn encode_common_tail(&self, buf: &mut Vec<u8>, binary: bool) {
        if binary {
            push_flag(buf, b'b');
        }
        if self.flags.no_reply {
            push_flag(buf, b'q');
        }
        if let Some(opaque) = &self.flags.opaque {
            push_flag(buf, b'O');
            buf.extend_from_slice(opaque);
        }
    }
}

#[inline]
fn push_flag(buf: &mut Vec<u8>, token: u8) {
    buf.push(b' ');
    buf.push(token);
}

fn push_int_flag(buf: &mut Vec<u8>, token: u8, value: Option<u32>) {
    if let Some(value) = value {
        push_flag(buf, token);
        write!(buf, "{value}").expect("write to Vec");
    }
}

fn push_u64_flag(buf: &mut Vec<u8>, token: u8, value: Option<u64>) {
    if let Some(value) = value {
        push_flag(buf, token);
        write!(buf, "{value}").expect("write to Vec");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{ArithmeticMode, SetMode};
    use bytes::Bytes;

    fn encode(request: Request<'_>) -> Vec<u8> {
        let mut buf = Vec::new();
        request.encode(&mut buf);
        buf
    }

    #[test]
    fn get_value_only() {
        let key = Key::new("foo");
        let flags = RequestFlags::default();
        let buf = encode(Request {
            command: Command::Get,
            key: &key,
            value: None,
            flags: &flags,
        });
        assert_eq!(buf, b"mg foo v\r\n");
    }

    #[test]
    fn get_with_metadata_flags() {
        let key = Key::new("foo");
        let flags = RequestFlags {
            return_client_flag: true,
            return_cas_token: true,
            recache_ttl: Some(30),
            ..Default::default()
        };
        let buf = encode(Request {
            command: Command::Get,
            key: &key,
            value: None,
            flags: &flags,
        });
        assert_eq!(buf, b"mg foo v f c R30\r\n");
    }

    #[test]
    fn touch_is_a_bare_ttl_get() {
        let key = Key::new("foo");
        let flags = RequestFlags {
            cache_ttl: Some(300),
            ..RequestFlags::none()
        };
        let buf = encode(Request {
            command: Command::Get,
            key: &key,
            value: None,
            flags: &flags,
        });
        assert_eq!(buf, b"mg foo T300\r\n");
    }

    #[test]
    fn set_with_ttl_and_mode() {
        let key = Key::new("foo");
        let flags = RequestFlags {
            cache_ttl: Some(60),
            ..Default::default()
        };
        let buf = encode(Request {
            command: Command::Set,
            key: &key,
            value: Some(b"bar"),
            flags: &flags,
        });
        assert_eq!(buf, b"ms foo S3 T60 MS\r\nbar\r\n");
    }

    #[test]
    fn set_with_cas_and_mark_stale() {
        let key = Key::new("k");
        let flags = RequestFlags {
            cache_ttl: Some(60),
            cas_token: Some(42),
            mark_stale: true,
            ..Default::default()
        };
        let buf = encode(Request {
            command: Command::Set,
            key: &key,
            value: Some(b"v"),
            flags: &flags,
        });
        assert_eq!(buf, b"ms k S1 T60 C42 MS I\r\nv\r\n");
    }

    #[test]
    fn set_modes() {
        let key = Key::new("k");
        for (mode, expected) in [
            (SetMode::Add, &b"ms k S1 ME\r\nv\r\n"[..]),
            (SetMode::Replace, b"ms k S1 MR\r\nv\r\n"),
            (SetMode::Append, b"ms k S1 MA\r\nv\r\n"),
            (SetMode::Prepend, b"ms k S1 MP\r\nv\r\n"),
        ] {
            let flags = RequestFlags {
                set_mode: mode,
                ..Default::default()
            };
            let buf = encode(Request {
                command: Command::Set,
                key: &key,
                value: Some(b"v"),
                flags: &flags,
            });
            assert_eq!(buf, expected);
        }
    }

    #[test]
    fn set_binary_key() {
        let key = Key::new("\u{1f37a}");
        let flags = RequestFlags {
            cache_ttl: Some(60),
            client_flag: Some(2),
            ..Default::default()
        };
        let buf = encode(Request {
            command: Command::Set,
            key: &key,
            value: Some(b"1"),
            flags: &flags,
        });
        assert_eq!(buf, b"ms 8J+Nug== S1 T60 F2 MS b\r\n1\r\n");
    }

    #[test]
    fn zero_client_flag_is_omitted() {
        let key = Key::new("k");
        let flags = RequestFlags {
            client_flag: Some(0),
            ..Default::default()
        };
        let buf = encode(Request {
            command: Command::Set,
            key: &key,
            value: Some(b"v"),
            flags: &flags,
        });
        assert_eq!(buf, b"ms k S1 MS\r\nv\r\n");
    }

    #[test]
    fn delete_plain_and_with_cas() {
        let key = Key::new("k");
        let flags = RequestFlags::none();
        let buf = encode(Request {
            command: Command::Delete,
            key: &key,
            value: None,
            flags: &flags,
        });
        assert_eq!(buf, b"md k\r\n");

        let flags = RequestFlags {
            cas_token: Some(9),
            ..RequestFlags::none()
        };
        let buf = encode(Request {
            command: Command::Delete,
            key: &key,
            value: None,
            flags: &flags,
        });
        assert_eq!(buf, b"md k C9\r\n");
    }

    #[test]
    fn delete_mark_stale_carries_ttl() {
        let key = Key::new("k");
        let flags = RequestFlags {
            mark_stale: true,
            cache_ttl: Some(20),
            ..RequestFlags::none()
        };
        let buf = encode(Request {
            command: Command::Delete,
            key: &key,
            value: None,
            flags: &flags,
        });
        assert_eq!(buf, b"md k I20\r\n");
    }

    #[test]
    fn arithmetic_incr_and_decr() {
        let key = Key::new("n");
        let flags = RequestFlags {
            ma_delta_value: Some(2),
            ..RequestFlags::none()
        };
        let buf = encode(Request {
            command: Command::Arithmetic,
            key: &key,
            value: None,
            flags: &flags,
        });
        assert_eq!(buf, b"ma n D2 MI\r\n");

        let flags = RequestFlags {
            ma_delta_value: Some(2),
            arithmetic_mode: ArithmeticMode::Decr,
            return_value: true,
            ..RequestFlags::none()
        };
        let buf = encode(Request {
            command: Command::Arithmetic,
            key: &key,
            value: None,
            flags: &flags,
        });
        assert_eq!(buf, b"ma n D2 MD v\r\n");
    }

    #[test]
    fn arithmetic_initialize() {
        let key = Key::new("n");
        let flags = RequestFlags {
            ma_delta_value: Some(1),
            ma_initial_value: Some(10),
            vivify_on_miss_ttl: Some(60),
            ..RequestFlags::none()
        };
        let buf = encode(Request {
            command: Command::Arithmetic,
            key: &key,
            value: None,
            flags: &flags,
        });
        assert_eq!(buf, b"ma n D1 J10 N60 MI\r\n");
    }

    #[test]
    fn quiet_and_opaque() {
        let key = Key::new("k");
        let flags = RequestFlags {
            no_reply: true,
            opaque: Some(Bytes::from_static(b"tag")),
            ..RequestFlags::none()
        };
        let buf = encode(Request {
            command: Command::Delete,
            key: &key,
            value: None,
            flags: &flags,
        });
        assert_eq!(buf, b"md k q Otag\r\n");
    }

    #[test]
    fn pipelined_encoding_appends() {
        let a = Key::new("a");
        let b = Key::new("b");
        let flags = RequestFlags::default();
        let mut buf = Vec::new();
        Request {
            command: Command::Get,
            key: &a,
            value: None,
            flags: &flags,
        }
        .encode(&mut buf);
        Request {
            command: Command::Get,
            key: &b,
            value: None,
            flags: &flags,
        }
        .encode(&mut buf);
        assert_eq!(buf, b"mg a v\r\nmg b v\r\n");
    }
}
