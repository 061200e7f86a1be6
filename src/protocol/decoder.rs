//! Incremental frame decoder.
//!
//! A pull parser fed arbitrarily sliced input. Bytes are copied into an
//! internal assembly buffer; the state machine walks
//! header → payload → complete and resumes cleanly when input runs out
//! mid-frame:
//!
//! - `Header`: the opcode byte first (it determines the fixed header
//!   length), then the rest of the fixed header;
//! - `Payload`: the declared payload length is known and being filled;
//! - `Complete`: exactly one frame is assembled; the caller extracts it and
//!   calls [`Decoder::reset`] before feeding more bytes.
//!
//! Errors are fatal to the current frame: the decoder must be reset before
//! further use.

use bytes::Bytes;

use super::event::Event;
use super::wire_format::{
    Opcode, BIG_ALLOC_THRESHOLD, DEFAULT_MAX_PAYLOAD_LEN, ENCODING_SEPARATOR, INITIAL_ALLOC,
};
use super::write_buffer::reserve_amortized;
use crate::error::{Error, Result};

/// Outcome of one [`Decoder::read_data`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// All available input was absorbed and the frame is still incomplete.
    NeedsMore,
    /// Exactly one frame is fully assembled.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Payload,
    Complete,
}

/// Assembly buffer plus parser state for one frame at a time.
#[derive(Debug)]
pub struct Decoder {
    buf: Vec<u8>,
    phase: Phase,
    opcode: Option<Opcode>,
    /// Opcode byte plus fixed header; the offset at which payload begins.
    /// Known once the opcode byte has been read.
    header_size: usize,
    payload_len: usize,
    seq: u32,
    code: u8,
    version: u8,
    ping_interval: u32,
    initial_alloc: usize,
    big_alloc_threshold: usize,
    max_payload_len: u32,
}

impl Decoder {
    /// Create a decoder with the default limits.
    pub fn new() -> Self {
        Self::with_limits(INITIAL_ALLOC, BIG_ALLOC_THRESHOLD, DEFAULT_MAX_PAYLOAD_LEN)
    }

    /// Create a decoder with custom allocation limits and payload cap.
    pub fn with_limits(
        initial_alloc: usize,
        big_alloc_threshold: usize,
        max_payload_len: u32,
    ) -> Self {
        Self {
            buf: Vec::new(),
            phase: Phase::Header,
            opcode: None,
            header_size: 0,
            payload_len: 0,
            seq: 0,
            code: 0,
            version: 0,
            ping_interval: 0,
            initial_alloc,
            big_alloc_threshold,
            max_payload_len,
        }
    }

    /// Feed input bytes; returns the status and how many bytes were
    /// absorbed.
    ///
    /// Input may be sliced arbitrarily, down to one byte at a time. On
    /// [`DecodeStatus::Complete`] absorption stops at the frame boundary;
    /// the caller extracts the frame, resets, and re-feeds the remainder.
    /// On error nothing useful can be said about consumption: the caller
    /// must reset the decoder and discard the rest of its input.
    pub fn read_data(&mut self, input: &[u8]) -> Result<(DecodeStatus, usize)> {
        debug_assert_ne!(self.phase, Phase::Complete, "reset() must run between frames");
        let mut consumed = 0;

        if self.phase == Phase::Header {
            if self.buf.is_empty() {
                // The opcode byte determines how long the header is.
                let Some(&b) = input.first() else {
                    return Ok((DecodeStatus::NeedsMore, 0));
                };
                let opcode = Opcode::from_u8(b).ok_or(Error::BadOpcode(b))?;
                self.push_bytes(&input[..1])?;
                consumed = 1;
                self.opcode = Some(opcode);
                self.header_size = 1 + opcode.header_len();
            }

            let need = self.header_size - self.buf.len();
            let take = need.min(input.len() - consumed);
            self.push_bytes(&input[consumed..consumed + take])?;
            consumed += take;
            if self.buf.len() < self.header_size {
                return Ok((DecodeStatus::NeedsMore, consumed));
            }

            self.parse_header()?;
            if self.payload_len == 0 {
                self.phase = Phase::Complete;
                return Ok((DecodeStatus::Complete, consumed));
            }
            self.phase = Phase::Payload;
        }

        let need = self.header_size + self.payload_len - self.buf.len();
        let take = need.min(input.len() - consumed);
        self.push_bytes(&input[consumed..consumed + take])?;
        consumed += take;

        if self.buf.len() == self.header_size + self.payload_len {
            self.phase = Phase::Complete;
            Ok((DecodeStatus::Complete, consumed))
        } else {
            Ok((DecodeStatus::NeedsMore, consumed))
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        reserve_amortized(&mut self.buf, bytes.len(), self.initial_alloc)?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn parse_header(&mut self) -> Result<()> {
        let opcode = self.opcode.expect("opcode read before header");
        let h = &self.buf[1..self.header_size];
        match opcode {
            Opcode::Ping | Opcode::Pong => {
                self.seq = read_u32(h, 0);
                self.payload_len = 0;
            }
            Opcode::Request | Opcode::Response => {
                self.seq = read_u32(h, 0);
                self.payload_len = read_u32(h, 4) as usize;
            }
            Opcode::Push | Opcode::SelectEncoding => {
                self.payload_len = read_u32(h, 0) as usize;
            }
            Opcode::Error => {
                self.code = h[0];
                self.seq = read_u32(h, 1);
                self.payload_len = read_u32(h, 5) as usize;
            }
            Opcode::GoAway => {
                self.code = h[0];
                self.payload_len = read_u32(h, 1) as usize;
            }
            Opcode::Hello => {
                self.version = h[0];
                self.ping_interval = read_u32(h, 1);
                self.payload_len = read_u32(h, 5) as usize;
            }
        }
        if self.payload_len > self.max_payload_len as usize {
            return Err(Error::FrameTooLarge {
                len: self.payload_len,
                max: self.max_payload_len as usize,
            });
        }
        Ok(())
    }

    /// Whether a complete frame is waiting to be extracted.
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    /// Sequence field of the completed frame (0 for opcodes without one).
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Code field of the completed ERROR or GOAWAY frame.
    pub fn code(&self) -> u8 {
        self.code
    }

    /// Version field of the completed HELLO frame.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Ping interval field of the completed HELLO frame, in milliseconds.
    pub fn ping_interval(&self) -> u32 {
        self.ping_interval
    }

    /// Payload region of the completed frame. Empty for PING/PONG and for
    /// zero-length payloads.
    pub fn payload(&self) -> &[u8] {
        debug_assert!(self.is_complete());
        &self.buf[self.header_size..self.header_size + self.payload_len]
    }

    /// Build the [`Event`] for the completed frame. Payload bytes are
    /// copied out, so the event survives the next [`Decoder::reset`].
    pub fn event(&self) -> Event {
        debug_assert!(self.is_complete(), "event() requires a complete frame");
        let opcode = self.opcode.expect("complete frame has an opcode");
        match opcode {
            Opcode::Request => Event::Request {
                seq: self.seq,
                payload: self.payload_bytes(),
            },
            Opcode::Response => Event::Response {
                seq: self.seq,
                payload: self.payload_bytes(),
            },
            Opcode::Push => Event::Push {
                payload: self.payload_bytes(),
            },
            Opcode::Ping => Event::Ping { seq: self.seq },
            Opcode::Pong => Event::Pong { seq: self.seq },
            Opcode::Hello => Event::Hello {
                version: self.version,
                ping_interval: self.ping_interval,
                supported_encodings: self
                    .payload()
                    .split(|b| *b == ENCODING_SEPARATOR)
                    .map(Bytes::copy_from_slice)
                    .collect(),
            },
            Opcode::GoAway => Event::GoAway {
                code: self.code,
                reason: self.payload_bytes(),
            },
            Opcode::SelectEncoding => Event::SelectEncoding {
                encoding: self.payload_bytes(),
            },
            Opcode::Error => Event::Error {
                code: self.code,
                seq: self.seq,
                payload: self.payload_bytes(),
            },
        }
    }

    fn payload_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.payload())
    }

    /// Clear parser state for the next frame, releasing the assembly buffer
    /// entirely once it has grown to [`BIG_ALLOC_THRESHOLD`].
    pub fn reset(&mut self) {
        self.phase = Phase::Header;
        self.opcode = None;
        self.header_size = 0;
        self.payload_len = 0;
        self.seq = 0;
        self.code = 0;
        self.version = 0;
        self.ping_interval = 0;
        if self.buf.capacity() >= self.big_alloc_threshold {
            self.buf = Vec::new();
        } else {
            self.buf.clear();
        }
    }

    /// Current allocation size of the assembly buffer in bytes.
    pub fn allocated(&self) -> usize {
        self.buf.capacity()
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_push, encode_request, WriteBuffer};

    fn frame_bytes(build: impl FnOnce(&mut WriteBuffer)) -> Vec<u8> {
        let mut buf = WriteBuffer::new();
        build(&mut buf);
        buf.get_bytes(usize::MAX, true).unwrap().to_vec()
    }

    #[test]
    fn test_whole_frame_in_one_call() {
        let bytes = frame_bytes(|b| encode_request(b, 42, b"hello").unwrap());
        let mut dec = Decoder::new();

        let (status, consumed) = dec.read_data(&bytes).unwrap();
        assert_eq!(status, DecodeStatus::Complete);
        assert_eq!(consumed, bytes.len());
        assert_eq!(dec.seq(), 42);
        assert_eq!(dec.payload(), b"hello");
        assert_eq!(
            dec.event(),
            Event::Request {
                seq: 42,
                payload: Bytes::from_static(b"hello")
            }
        );
    }

    #[test]
    fn test_byte_at_a_time() {
        let bytes = frame_bytes(|b| encode_push(b, b"xyz").unwrap());
        let mut dec = Decoder::new();

        for &byte in &bytes[..bytes.len() - 1] {
            let (status, consumed) = dec.read_data(&[byte]).unwrap();
            assert_eq!(status, DecodeStatus::NeedsMore);
            assert_eq!(consumed, 1);
        }
        let (status, consumed) = dec.read_data(&[bytes[bytes.len() - 1]]).unwrap();
        assert_eq!(status, DecodeStatus::Complete);
        assert_eq!(consumed, 1);
        assert_eq!(dec.payload(), b"xyz");
    }

    #[test]
    fn test_consumption_stops_at_frame_boundary() {
        let mut bytes = frame_bytes(|b| encode_push(b, b"one").unwrap());
        let second = frame_bytes(|b| encode_push(b, b"two").unwrap());
        let first_len = bytes.len();
        bytes.extend_from_slice(&second);

        let mut dec = Decoder::new();
        let (status, consumed) = dec.read_data(&bytes).unwrap();
        assert_eq!(status, DecodeStatus::Complete);
        assert_eq!(consumed, first_len);
        assert_eq!(dec.payload(), b"one");

        dec.reset();
        let (status, consumed) = dec.read_data(&bytes[first_len..]).unwrap();
        assert_eq!(status, DecodeStatus::Complete);
        assert_eq!(consumed, second.len());
        assert_eq!(dec.payload(), b"two");
    }

    #[test]
    fn test_empty_input_needs_more() {
        let mut dec = Decoder::new();
        let (status, consumed) = dec.read_data(&[]).unwrap();
        assert_eq!(status, DecodeStatus::NeedsMore);
        assert_eq!(consumed, 0);
    }

    #[test]
    fn test_ping_completes_without_payload_phase() {
        let mut dec = Decoder::new();
        let (status, _) = dec.read_data(&[0x04, 0, 0, 0, 9]).unwrap();
        assert_eq!(status, DecodeStatus::Complete);
        assert_eq!(dec.event(), Event::Ping { seq: 9 });
        assert!(dec.payload().is_empty());
    }

    #[test]
    fn test_bad_opcode_rejected() {
        let mut dec = Decoder::new();
        let err = dec.read_data(&[0xFF]).unwrap_err();
        assert!(matches!(err, Error::BadOpcode(0xFF)));

        // Usable again after reset.
        dec.reset();
        let (status, _) = dec.read_data(&[0x04, 0, 0, 0, 1]).unwrap();
        assert_eq!(status, DecodeStatus::Complete);
    }

    #[test]
    fn test_zero_opcode_rejected() {
        let mut dec = Decoder::new();
        assert!(matches!(
            dec.read_data(&[0x00]).unwrap_err(),
            Error::BadOpcode(0x00)
        ));
    }

    #[test]
    fn test_payload_cap_enforced() {
        let mut dec = Decoder::with_limits(64, 1024, 16);
        // PUSH declaring a 1000-byte payload.
        let mut bytes = vec![0x03];
        bytes.extend_from_slice(&1000u32.to_be_bytes());
        let err = dec.read_data(&bytes).unwrap_err();
        assert!(matches!(
            err,
            Error::FrameTooLarge { len: 1000, max: 16 }
        ));
    }

    #[test]
    fn test_hello_splits_encodings() {
        let mut bytes = vec![0x06, 2];
        bytes.extend_from_slice(&5000u32.to_be_bytes());
        bytes.extend_from_slice(&9u32.to_be_bytes());
        bytes.extend_from_slice(b"json,cbor");

        let mut dec = Decoder::new();
        let (status, _) = dec.read_data(&bytes).unwrap();
        assert_eq!(status, DecodeStatus::Complete);
        assert_eq!(
            dec.event(),
            Event::Hello {
                version: 2,
                ping_interval: 5000,
                supported_encodings: vec![Bytes::from_static(b"json"), Bytes::from_static(b"cbor")],
            }
        );
    }

    #[test]
    fn test_hello_empty_payload_single_empty_encoding() {
        let mut bytes = vec![0x06, 1];
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());

        let mut dec = Decoder::new();
        let (status, _) = dec.read_data(&bytes).unwrap();
        assert_eq!(status, DecodeStatus::Complete);
        match dec.event() {
            Event::Hello {
                supported_encodings,
                ..
            } => assert_eq!(supported_encodings, vec![Bytes::new()]),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_event_survives_reset() {
        let bytes = frame_bytes(|b| encode_push(b, b"keep me").unwrap());
        let mut dec = Decoder::new();
        dec.read_data(&bytes).unwrap();
        let event = dec.event();
        dec.reset();
        assert_eq!(
            event,
            Event::Push {
                payload: Bytes::from_static(b"keep me")
            }
        );
    }

    #[test]
    fn test_reset_releases_big_allocation() {
        let mut dec = Decoder::with_limits(16, 64, u32::MAX);
        let payload = vec![0xCD; 200];
        let bytes = frame_bytes(|b| encode_push(b, &payload).unwrap());

        let (status, _) = dec.read_data(&bytes).unwrap();
        assert_eq!(status, DecodeStatus::Complete);
        assert!(dec.allocated() >= 64);

        dec.reset();
        assert_eq!(dec.allocated(), 0);

        // Still decodes after the lazy re-allocation.
        let small = frame_bytes(|b| encode_push(b, b"ok").unwrap());
        let (status, _) = dec.read_data(&small).unwrap();
        assert_eq!(status, DecodeStatus::Complete);
        assert_eq!(dec.payload(), b"ok");
    }

    #[test]
    fn test_reset_retains_small_allocation() {
        let mut dec = Decoder::with_limits(16, 1 << 20, u32::MAX);
        let bytes = frame_bytes(|b| encode_push(b, b"tiny").unwrap());
        dec.read_data(&bytes).unwrap();
        dec.reset();
        assert!(dec.allocated() > 0);
    }

    #[test]
    fn test_goaway_fields() {
        let mut bytes = vec![0x07, 3];
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(b"bye!");

        let mut dec = Decoder::new();
        let (status, _) = dec.read_data(&bytes).unwrap();
        assert_eq!(status, DecodeStatus::Complete);
        assert_eq!(dec.code(), 3);
        assert_eq!(
            dec.event(),
            Event::GoAway {
                code: 3,
                reason: Bytes::from_static(b"bye!")
            }
        );
    }

    #[test]
    fn test_error_fields() {
        let mut bytes = vec![0x09, 7];
        bytes.extend_from_slice(&12u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());

        let mut dec = Decoder::new();
        let (status, _) = dec.read_data(&bytes).unwrap();
        assert_eq!(status, DecodeStatus::Complete);
        assert_eq!(
            dec.event(),
            Event::Error {
                code: 7,
                seq: 12,
                payload: Bytes::new()
            }
        );
    }

    #[test]
    fn test_resume_across_header_and_payload_split() {
        let bytes = frame_bytes(|b| encode_request(b, 5, b"abcdef").unwrap());
        let mut dec = Decoder::new();

        // Header split mid-seq, payload split mid-way.
        let (s1, c1) = dec.read_data(&bytes[..3]).unwrap();
        assert_eq!((s1, c1), (DecodeStatus::NeedsMore, 3));
        let (s2, c2) = dec.read_data(&bytes[3..11]).unwrap();
        assert_eq!((s2, c2), (DecodeStatus::NeedsMore, 8));
        let (s3, c3) = dec.read_data(&bytes[11..]).unwrap();
        assert_eq!((s3, c3), (DecodeStatus::Complete, bytes.len() - 11));
        assert_eq!(dec.payload(), b"abcdef");
    }
}
