//! Wire format: opcodes, frame layouts, and encoders.
//!
//! Every frame starts with a 1-byte opcode followed by an opcode-specific
//! fixed header, then the payload when one is present:
//!
//! ```text
//! PING / PONG      ┌────────┬──────────┐
//!                  │ opcode │ seq (u32)│
//!                  └────────┴──────────┘
//! REQUEST/RESPONSE ┌────────┬──────────┬───────────┬─────────┐
//!                  │ opcode │ seq (u32)│ len (u32) │ payload │
//!                  └────────┴──────────┴───────────┴─────────┘
//! PUSH / SELECT    ┌────────┬───────────┬─────────┐
//!                  │ opcode │ len (u32) │ payload │
//!                  └────────┴───────────┴─────────┘
//! ERROR            ┌────────┬──────┬──────────┬───────────┬─────────┐
//!                  │ opcode │ code │ seq (u32)│ len (u32) │ payload │
//!                  └────────┴──────┴──────────┴───────────┴─────────┘
//! GOAWAY           ┌────────┬──────┬───────────┬─────────┐
//!                  │ opcode │ code │ len (u32) │ reason  │
//!                  └────────┴──────┴───────────┴─────────┘
//! HELLO            ┌────────┬─────────┬───────────────┬───────────┬───────────┐
//!                  │ opcode │ version │ interval (u32)│ len (u32) │ encodings │
//!                  └────────┴─────────┴───────────────┴───────────┴───────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. HELLO's payload is the peer's
//! supported encoding names joined by `,` (0x2C).

use super::write_buffer::WriteBuffer;
use crate::error::{Error, Result};

/// Version byte carried in every outgoing HELLO.
pub const PROTOCOL_VERSION: u8 = 1;

/// Sequence issuance wraps to 0 when the counter reaches this value, so the
/// highest value ever issued is `SEQ_MAX - 1`. `u32::MAX` never appears on
/// the wire, and 0 doubles as the "no sequence" sentinel.
pub const SEQ_MAX: u32 = u32::MAX - 1;

/// Separator between encoding names in a HELLO payload.
pub const ENCODING_SEPARATOR: u8 = b',';

/// Smallest allocation a protocol buffer makes on first use (512 KiB).
pub const INITIAL_ALLOC: usize = 512 * 1024;

/// Allocation size at or above which a drained or reset buffer releases its
/// storage instead of retaining it (2 MiB).
pub const BIG_ALLOC_THRESHOLD: usize = 2 * 1024 * 1024;

/// Default maximum accepted payload length (1 GiB).
pub const DEFAULT_MAX_PAYLOAD_LEN: u32 = 1_073_741_824;

/// Frame discriminant, the first byte of every frame.
///
/// 0x00 is deliberately unassigned so zero-filled memory never parses as a
/// frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Caller-allocated seq, optional payload; expects RESPONSE or ERROR.
    Request = 0x01,
    /// Echoes a REQUEST seq with the result payload.
    Response = 0x02,
    /// One-way payload, no sequence.
    Push = 0x03,
    /// Liveness probe carrying a fresh seq.
    Ping = 0x04,
    /// Echoes a PING seq.
    Pong = 0x05,
    /// Greeting: version, ping cadence, supported encodings.
    Hello = 0x06,
    /// Close signal with a code and optional reason.
    GoAway = 0x07,
    /// Picks one of the encodings a HELLO advertised.
    SelectEncoding = 0x08,
    /// Failure reply echoing a REQUEST seq.
    Error = 0x09,
}

impl Opcode {
    /// Parse an opcode byte. `None` for anything outside the recognised set.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Request),
            0x02 => Some(Self::Response),
            0x03 => Some(Self::Push),
            0x04 => Some(Self::Ping),
            0x05 => Some(Self::Pong),
            0x06 => Some(Self::Hello),
            0x07 => Some(Self::GoAway),
            0x08 => Some(Self::SelectEncoding),
            0x09 => Some(Self::Error),
            _ => None,
        }
    }

    /// Length of the fixed header following the opcode byte.
    pub fn header_len(self) -> usize {
        match self {
            Opcode::Ping | Opcode::Pong => 4,
            Opcode::Push | Opcode::SelectEncoding => 4,
            Opcode::Request | Opcode::Response => 8,
            Opcode::GoAway => 5,
            Opcode::Hello | Opcode::Error => 9,
        }
    }

    /// Whether the fixed header ends with a payload length field.
    pub fn has_payload(self) -> bool {
        !matches!(self, Opcode::Ping | Opcode::Pong)
    }
}

fn payload_len_u32(payload: &[u8]) -> Result<u32> {
    u32::try_from(payload.len()).map_err(|_| Error::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })
}

/// Append a PING frame.
pub fn encode_ping(buf: &mut WriteBuffer, seq: u32) -> Result<()> {
    buf.reserve(5)?;
    buf.put_u8(Opcode::Ping as u8);
    buf.put_u32(seq);
    Ok(())
}

/// Append a PONG frame echoing `seq`.
pub fn encode_pong(buf: &mut WriteBuffer, seq: u32) -> Result<()> {
    buf.reserve(5)?;
    buf.put_u8(Opcode::Pong as u8);
    buf.put_u32(seq);
    Ok(())
}

/// Append a REQUEST frame.
pub fn encode_request(buf: &mut WriteBuffer, seq: u32, payload: &[u8]) -> Result<()> {
    let len = payload_len_u32(payload)?;
    buf.reserve(9 + payload.len())?;
    buf.put_u8(Opcode::Request as u8);
    buf.put_u32(seq);
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(())
}

/// Append a RESPONSE frame echoing `seq`.
pub fn encode_response(buf: &mut WriteBuffer, seq: u32, payload: &[u8]) -> Result<()> {
    let len = payload_len_u32(payload)?;
    buf.reserve(9 + payload.len())?;
    buf.put_u8(Opcode::Response as u8);
    buf.put_u32(seq);
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(())
}

/// Append a PUSH frame.
pub fn encode_push(buf: &mut WriteBuffer, payload: &[u8]) -> Result<()> {
    let len = payload_len_u32(payload)?;
    buf.reserve(5 + payload.len())?;
    buf.put_u8(Opcode::Push as u8);
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(())
}

/// Append an ERROR frame echoing `seq`.
pub fn encode_error(buf: &mut WriteBuffer, code: u8, seq: u32, payload: &[u8]) -> Result<()> {
    let len = payload_len_u32(payload)?;
    buf.reserve(10 + payload.len())?;
    buf.put_u8(Opcode::Error as u8);
    buf.put_u8(code);
    buf.put_u32(seq);
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(())
}

/// Append a GOAWAY frame.
pub fn encode_goaway(buf: &mut WriteBuffer, code: u8, reason: &[u8]) -> Result<()> {
    let len = payload_len_u32(reason)?;
    buf.reserve(6 + reason.len())?;
    buf.put_u8(Opcode::GoAway as u8);
    buf.put_u8(code);
    buf.put_u32(len);
    buf.put_slice(reason);
    Ok(())
}

/// Append a SELECT_ENCODING frame.
pub fn encode_select_encoding(buf: &mut WriteBuffer, encoding: &[u8]) -> Result<()> {
    let len = payload_len_u32(encoding)?;
    buf.reserve(5 + encoding.len())?;
    buf.put_u8(Opcode::SelectEncoding as u8);
    buf.put_u32(len);
    buf.put_slice(encoding);
    Ok(())
}

/// Append a HELLO frame.
///
/// `encodings` are joined with [`ENCODING_SEPARATOR`] into the payload; an
/// empty list yields an empty payload.
pub fn encode_hello<B: AsRef<[u8]>>(
    buf: &mut WriteBuffer,
    version: u8,
    ping_interval: u32,
    encodings: &[B],
) -> Result<()> {
    let mut payload_len = 0usize;
    for (i, enc) in encodings.iter().enumerate() {
        if i > 0 {
            payload_len += 1;
        }
        payload_len += enc.as_ref().len();
    }
    let len = u32::try_from(payload_len).map_err(|_| Error::FrameTooLarge {
        len: payload_len,
        max: u32::MAX as usize,
    })?;

    buf.reserve(10 + payload_len)?;
    buf.put_u8(Opcode::Hello as u8);
    buf.put_u8(version);
    buf.put_u32(ping_interval);
    buf.put_u32(len);
    for (i, enc) in encodings.iter().enumerate() {
        if i > 0 {
            buf.put_u8(ENCODING_SEPARATOR);
        }
        buf.put_slice(enc.as_ref());
    }
    Ok(())
}
