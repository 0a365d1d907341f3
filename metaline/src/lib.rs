//! Memcache client built on the meta text protocol.
//!
//! A logical cache operation is routed to a server by consistent hashing,
//! a connection is borrowed from that server's pool, the request goes out
//! as one meta-protocol line, and the typed reply feeds the high-level
//! anti-dogpiling policies: early recache, miss leases, and serve-stale.
//! A fallback ("gutter") ring can absorb traffic for servers that are down,
//! with TTLs shortened so it never promotes stale state.
//!
//! The client is synchronous and thread-safe: clone the handle freely and
//! call it from as many threads as you like. Calls suspend only for socket
//! I/O or a lease backoff sleep; there are no background threads.
//!
//! # Example
//!
//! ```no_run
//! use metaline::{CacheClient, Key, ServerAddress};
//!
//! fn example() -> Result<(), metaline::Error> {
//!     let client = CacheClient::builder()
//!         .server(ServerAddress::new("127.0.0.1", 11211))
//!         .server(ServerAddress::new("127.0.0.1", 11212))
//!         .build()?;
//!
//!     client.set(&Key::new("hello"), "world", 60)?;
//!     let value = client.get(&Key::new("hello"))?;
//!     assert_eq!(value, Some("world".into()));
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod connection;
mod error;
mod events;
mod executor;
mod pool;
mod ring;
mod router;
mod value;

pub use client::{
    CacheClient, ClientBuilder, DeleteOptions, DeltaOptions, GetOptions, SetOptions,
    DEFAULT_GUTTER_TTL, DEFAULT_TOUCH_TTL_WRITE_FAILURE,
};
pub use config::{LeasePolicy, PoolOptions, RecachePolicy, ServerAddress, StalePolicy};
pub use connection::{Connection, SocketFactory, TcpSocketFactory, DEFAULT_READ_BUFFER_SIZE};
pub use error::Error;
pub use events::WriteFailureHook;
pub use pool::PoolCounters;
pub use router::FailureHandling;
pub use value::{
    CacheValue, CodecError, FromCacheValue, StandardCodec, ValueCodec, FLAG_BYTES, FLAG_INT,
    FLAG_TEXT, FLAG_ZLIB,
};

pub use protocol_meta::{
    ArithmeticMode, Command, Key, ParseError, RequestFlags, Response, ResponseFlags, SetMode,
};
