//! Decoded frames as a tagged sum type.
//!
//! One variant per opcode, carrying exactly the semantic fields of that
//! frame. Payloads are owned [`Bytes`] copies, independent of the decode
//! buffer they were assembled in.

use bytes::Bytes;

use super::wire_format::Opcode;

/// A fully decoded incoming frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Incoming call; answer with a RESPONSE or ERROR echoing `seq`.
    Request {
        /// Peer-allocated sequence.
        seq: u32,
        /// Call payload, possibly empty.
        payload: Bytes,
    },
    /// Reply to a REQUEST this side sent.
    Response {
        /// Echoed sequence.
        seq: u32,
        /// Result payload.
        payload: Bytes,
    },
    /// One-way message, no reply expected.
    Push {
        /// Message payload.
        payload: Bytes,
    },
    /// Liveness probe; the stream handler has already queued the PONG.
    Ping {
        /// Peer-allocated sequence.
        seq: u32,
    },
    /// Answer to a PING this side sent.
    Pong {
        /// Echoed sequence.
        seq: u32,
    },
    /// Peer greeting.
    Hello {
        /// Peer's protocol version byte.
        version: u8,
        /// Peer's desired ping cadence in milliseconds.
        ping_interval: u32,
        /// Encoding names the peer supports, in preference order. A HELLO
        /// with an empty payload decodes as one empty name; filtering is
        /// the session layer's concern.
        supported_encodings: Vec<Bytes>,
    },
    /// Close signal.
    GoAway {
        /// Close code.
        code: u8,
        /// Human-readable reason, possibly empty.
        reason: Bytes,
    },
    /// Peer picked one of the encodings this side advertised.
    SelectEncoding {
        /// Chosen encoding name.
        encoding: Bytes,
    },
    /// Failure reply to a REQUEST this side sent.
    Error {
        /// Error code.
        code: u8,
        /// Echoed sequence.
        seq: u32,
        /// Error detail, possibly empty.
        payload: Bytes,
    },
}

impl Event {
    /// The opcode this event was decoded from.
    pub fn opcode(&self) -> Opcode {
        match self {
            Event::Request { .. } => Opcode::Request,
            Event::Response { .. } => Opcode::Response,
            Event::Push { .. } => Opcode::Push,
            Event::Ping { .. } => Opcode::Ping,
            Event::Pong { .. } => Opcode::Pong,
            Event::Hello { .. } => Opcode::Hello,
            Event::GoAway { .. } => Opcode::GoAway,
            Event::SelectEncoding { .. } => Opcode::SelectEncoding,
            Event::Error { .. } => Opcode::Error,
        }
    }

    /// The sequence this event carries, if its opcode has one.
    pub fn seq(&self) -> Option<u32> {
        match self {
            Event::Request { seq, .. }
            | Event::Response { seq, .. }
            | Event::Ping { seq }
            | Event::Pong { seq }
            | Event::Error { seq, .. } => Some(*seq),
            _ => None,
        }
    }
}
