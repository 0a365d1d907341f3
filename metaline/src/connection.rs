//! A single pooled connection.
//!
//! [`Connection`] wraps a TCP socket with a reusable read buffer and a
//! poisoned flag. The codec pulls either "a full line" or "exactly N bytes"
//! from it; the buffer is compacted only when a partial line straddles the
//! end of the filled region. Any I/O error, unexpected EOF, or framing
//! violation poisons the connection: its reply stream is no longer known to
//! be at a clean boundary, so the pool closes it instead of reusing it.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;

use crate::config::ServerAddress;

/// Default read buffer size in bytes.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

const CRLF: &[u8] = b"\r\n";

/// Opens sockets for a pool. Implement this to add TLS, unix sockets, or
/// authentication; the default [`TcpSocketFactory`] covers plain TCP.
pub trait SocketFactory: Send + Sync {
    fn connect(&self, server: &ServerAddress) -> io::Result<TcpStream>;
}

/// Plain TCP socket factory with connect/receive timeouts and NO_DELAY.
#[derive(Debug, Clone)]
pub struct TcpSocketFactory {
    pub connection_timeout: Duration,
    pub recv_timeout: Duration,
    pub no_delay: bool,
}

impl Default for TcpSocketFactory {
    fn default() -> Self {
        TcpSocketFactory {
            connection_timeout: Duration::from_secs(1),
            recv_timeout: Duration::from_secs(1),
            no_delay: true,
        }
    }
}

impl SocketFactory for TcpSocketFactory {
    fn connect(&self, server: &ServerAddress) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in (server.host(), server.port()).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connection_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.recv_timeout))?;
                    stream.set_write_timeout(Some(self.recv_timeout))?;
                    stream.set_nodelay(self.no_delay)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
        }))
    }
}

/// A socket plus a reusable read buffer and a poisoned flag.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    buf: Box<[u8]>,
    /// Start of unconsumed data in `buf`.
    pos: usize,
    /// End of valid data in `buf`.
    filled: usize,
    poisoned: bool,
}

impl Connection {
    /// Wrap an established socket. `buffer_size` is rounded up to a power
    /// of two.
    pub fn new(stream: TcpStream, buffer_size: usize) -> Self {
        let size = buffer_size.max(64).next_power_of_two();
        Connection {
            stream,
            buf: vec![0u8; size].into_boxed_slice(),
            pos: 0,
            filled: 0,
            poisoned: false,
        }
    }

    /// Mark this connection as unusable. Poisoned connections are closed
    /// by the pool instead of being returned to the idle set.
    #[inline]
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Write a fully serialized request in one call.
    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if let Err(e) = self.stream.write_all(data) {
            self.poison();
            return Err(e);
        }
        Ok(())
    }

    /// Read one reply line, returning it without its CRLF terminator.
    pub fn read_line(&mut self) -> io::Result<&[u8]> {
        let (start, end) = self.fill_line()?;
        self.pos = end + CRLF.len();
        Ok(&self.buf[start..end])
    }

    /// Read a value payload of `size` bytes plus its trailing CRLF.
    ///
    /// The payload is copied out of the internal buffer so it stays valid
    /// after the connection is released back to the pool. Payloads larger
    /// than the buffer are read into a fresh allocation.
    pub fn read_value(&mut self, size: usize) -> io::Result<Bytes> {
        let total = size + CRLF.len();

        if total <= self.buf.len() {
            if self.pos + total > self.buf.len() {
                self.compact();
            }
            while self.filled - self.pos < total {
                self.fill()?;
            }
            let data = &self.buf[self.pos..self.pos + total];
            if &data[size..] != CRLF {
                self.poison();
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "value payload not terminated by CRLF",
                ));
            }
            let value = Bytes::copy_from_slice(&data[..size]);
            self.pos += total;
            Ok(value)
        } else {
            let mut message = vec![0u8; total];
            let buffered = self.filled - self.pos;
            message[..buffered].copy_from_slice(&self.buf[self.pos..self.filled]);
            self.pos = self.filled;
            if let Err(e) = self.stream.read_exact(&mut message[buffered..]) {
                self.poison();
                return Err(e);
            }
            if &message[size..] != CRLF {
                self.poison();
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "value payload not terminated by CRLF",
                ));
            }
            message.truncate(size);
            Ok(Bytes::from(message))
        }
    }

    /// Locate the next CRLF, filling the buffer as needed. Returns the line
    /// bounds within the buffer.
    fn fill_line(&mut self) -> io::Result<(usize, usize)> {
        loop {
            if let Some(at) = find_crlf(&self.buf[self.pos..self.filled]) {
                return Ok((self.pos, self.pos + at));
            }
            if self.filled == self.buf.len() {
                if self.pos == 0 {
                    self.poison();
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "reply line exceeds read buffer",
                    ));
                }
                self.compact();
            }
            self.fill()?;
        }
    }

    /// Read more bytes from the socket into the buffer tail.
    fn fill(&mut self) -> io::Result<()> {
        match self.stream.read(&mut self.buf[self.filled..]) {
            Ok(0) => {
                self.poison();
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-reply",
                ))
            }
            Ok(n) => {
                self.filled += n;
                Ok(())
            }
            Err(e) => {
                self.poison();
                Err(e)
            }
        }
    }

    /// Move unconsumed bytes to the front of the buffer.
    fn compact(&mut self) {
        self.buf.copy_within(self.pos..self.filled, 0);
        self.filled -= self.pos;
        self.pos = 0;
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == CRLF)
}
