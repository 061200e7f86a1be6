//! # duplexwire
//!
//! A duplex RPC framing layer over any reliable byte stream.
//!
//! The heart of the crate is the synchronous, transport-agnostic
//! [`StreamHandler`]: a per-connection codec that turns received byte
//! chunks into typed [`Event`]s and locally produced events into wire
//! bytes, with incremental parsing, per-direction sequence issuance, and
//! amortised buffer reuse. On top of it sits an optional tokio runtime:
//! [`Connection`] drives a handler against a socket and [`Server`] accepts
//! sessions over TCP.
//!
//! ## Architecture
//!
//! - **Wire level** ([`protocol`]): opcodes, frame layouts, the write
//!   buffer, and the incremental decoder.
//! - **Codec endpoint** ([`stream`]): the [`StreamHandler`] public surface.
//! - **Payload encodings** ([`codec`]): msgpack / json / raw, negotiated in
//!   band via HELLO and SELECT_ENCODING.
//! - **Session runtime** ([`connection`], [`server`]): request correlation,
//!   dispatch, ping cadence, teardown.
//!
//! ## Example
//!
//! ```
//! use duplexwire::{Event, StreamHandler};
//!
//! // Two endpoints wired back to back.
//! let mut client = StreamHandler::new();
//! let mut server = StreamHandler::new();
//!
//! let seq = client.send_request(b"2+2?").unwrap();
//! let wire = client.write_buffer_get_bytes(usize::MAX, true).unwrap();
//!
//! let events = server.on_bytes_received(&wire).unwrap();
//! assert!(matches!(&events[..], [Event::Request { .. }]));
//!
//! server.send_response(seq, b"4").unwrap();
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod server;
pub mod stream;

pub use codec::Encoding;
pub use connection::{BoxFuture, Connection, ConnectionConfig, NullService, Service};
pub use error::{Error, Result};
pub use protocol::{Event, Opcode};
pub use server::Server;
pub use stream::{HandlerConfig, StreamHandler};
