//! Request execution against a single pool.
//!
//! The executor is a thin procedure: borrow a connection, write one encoded
//! request (or a pipelined batch) in a single buffer, read the replies, and
//! hand the connection back. Server error lines are surfaced as errors
//! without poisoning when the line was complete; anything that leaves the
//! reply stream at an unknown boundary poisons the connection so the pool
//! retires it.

use std::io;

use protocol_meta::{
    Command, Key, ParseError, Request, RequestFlags, Response, ResponseFlags, ResponseLine,
};

use crate::connection::Connection;
use crate::error::Error;
use crate::pool::ConnectionPool;

/// Execute one request on the pool serving `key`'s server.
pub(crate) fn exec(
    pool: &ConnectionPool,
    command: Command,
    key: &Key,
    value: Option<&[u8]>,
    flags: &RequestFlags,
) -> Result<Response, Error> {
    let mut conn = pool.acquire()?;
    let mut buf = Vec::with_capacity(64 + value.map_or(0, <[u8]>::len));
    Request {
        command,
        key,
        value,
        flags,
    }
    .encode(&mut buf);

    let result = (|| {
        conn.write_all(&buf).map_err(|e| wrap_io(pool.label(), e))?;
        if flags.no_reply {
            return Ok(Response::Success(ResponseFlags::default()));
        }
        read_response(pool.label(), &mut conn)
    })();

    pool.release(conn);
    result
}

/// Execute a pipelined multi-get: all request lines in one write, then the
/// replies consumed in request order.
pub(crate) fn exec_multi(
    pool: &ConnectionPool,
    keys: &[&Key],
    flags: &RequestFlags,
) -> Result<Vec<Response>, Error> {
    let mut conn = pool.acquire()?;
    let mut buf = Vec::with_capacity(keys.len() * 32);
    for &key in keys {
        Request {
            command: Command::Get,
            key,
            value: None,
            flags,
        }
        .encode(&mut buf);
    }

    let result = (|| {
        conn.write_all(&buf).map_err(|e| wrap_io(pool.label(), e))?;
        if flags.no_reply {
            return Ok(vec![Response::Success(ResponseFlags::default()); keys.len()]);
        }
        let mut responses = Vec::with_capacity(keys.len());
        for _ in keys {
            responses.push(read_response(pool.label(), &mut conn)?);
        }
        Ok(responses)
    })();

    pool.release(conn);
    result
}

/// Read and assemble one reply.
fn read_response(server: &str, conn: &mut Connection) -> Result<Response, Error> {
    let parsed = {
        let line = conn.read_line().map_err(|e| wrap_io(server, e))?;
        ResponseLine::parse_line(line)
    };
    let line = match parsed {
        Ok(line) => line,
        Err(source) => {
            conn.poison();
            return Err(Error::Protocol {
                server: server.to_owned(),
                source,
            });
        }
    };

    match line {
        ResponseLine::Value { size, flags } => {
            let data = conn.read_value(size).map_err(|e| wrap_io(server, e))?;
            Ok(Response::Value { flags, data })
        }
        ResponseLine::Success(flags) => Ok(Response::Success(flags)),
        ResponseLine::Miss => Ok(Response::Miss),
        ResponseLine::NotStored => Ok(Response::NotStored),
        ResponseLine::Conflict => Ok(Response::Conflict),
        // ERROR and CLIENT_ERROR mean the server rejected the command
        // outright; the stream may hold anything, so poison.
        ResponseLine::Error => {
            conn.poison();
            Err(Error::Server {
                server: server.to_owned(),
                message: "ERROR".to_owned(),
            })
        }
        ResponseLine::ClientError(message) => {
            conn.poison();
            Err(Error::Server {
                server: server.to_owned(),
                message: format!("CLIENT_ERROR {message}"),
            })
        }
        // A complete SERVER_ERROR line leaves the stream at a boundary;
        // the connection stays usable.
        ResponseLine::ServerError(message) => Err(Error::Server {
            server: server.to_owned(),
            message: format!("SERVER_ERROR {message}"),
        }),
    }
}

fn wrap_io(server: &str, source: io::Error) -> Error {
    if source.kind() == io::ErrorKind::InvalidData {
        Error::Protocol {
            server: server.to_owned(),
            source: ParseError::Protocol("malformed reply framing"),
        }
    } else {
        Error::Connection {
            server: server.to_owned(),
            source,
        }
    }
}
