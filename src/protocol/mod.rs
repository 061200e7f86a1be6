//! Protocol module - wire format, buffers, and the frame decoder.
//!
//! This module implements the byte level of the duplex protocol:
//! - per-opcode frame layouts and encoders
//! - the outgoing write buffer with its consumption cursor
//! - the incremental decoder state machine
//! - the decoded [`Event`] sum type

mod decoder;
mod event;
mod wire_format;
mod write_buffer;

pub use decoder::{DecodeStatus, Decoder};
pub use event::Event;
pub use wire_format::{
    encode_error, encode_goaway, encode_hello, encode_ping, encode_pong, encode_push,
    encode_request, encode_response, encode_select_encoding, Opcode, BIG_ALLOC_THRESHOLD,
    DEFAULT_MAX_PAYLOAD_LEN, ENCODING_SEPARATOR, INITIAL_ALLOC, PROTOCOL_VERSION, SEQ_MAX,
};
pub use write_buffer::WriteBuffer;
