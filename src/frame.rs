//! # Frame
//!
//! WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2),
//! restricted to what a non-fragmenting client needs.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! The FIN bit is always set: messages are never split over several frames. Outgoing frames
//! ([`Frame`]) carry a masking key when masking is enabled, incoming frames are surfaced as a
//! [`Message`] and must never be masked.
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::WebSocketError;

/// WebSocket operation code (OpCode) that determines the semantic meaning and handling of a frame.
///
/// The numeric values for each OpCode are defined in [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8):
/// - Continuation = 0x0
/// - Text = 0x1
/// - Binary = 0x2
/// - Close = 0x8
/// - Ping = 0x9
/// - Pong = 0xA
///
/// The ranges 0x3-0x7 and 0xB-0xF are reserved; frames using them are rejected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` if the `OpCode` represents a control frame (`Close`, `Ping`, or `Pong`).
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Returns `true` for the opcodes carrying application data (`Text` or `Binary`).
    pub fn is_data(&self) -> bool {
        matches!(*self, OpCode::Text | OpCode::Binary)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    /// Interprets the low nibble of the first header byte.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebSocketError::Protocol(format!(
                "reserved opcode {value:#x}"
            ))),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// The largest header a frame can have: 2 bytes, 8 bytes of extended length and 4 of mask.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// An outgoing WebSocket frame.
///
/// Frames are always final (FIN set). The masking key is chosen when the frame is masked with
/// [`Frame::mask`], which XORs the payload in place.
#[derive(Debug)]
pub struct Frame {
    /// The opcode of the frame, defining its type.
    pub opcode: OpCode,
    /// The masking key, present once the payload has been masked.
    mask: Option<[u8; 4]>,
    /// The payload of the frame.
    pub payload: BytesMut,
}

impl Frame {
    /// Creates a new unmasked frame.
    pub fn new(opcode: OpCode, payload: impl AsRef<[u8]>) -> Self {
        Self {
            opcode,
            mask: None,
            payload: BytesMut::from(payload.as_ref()),
        }
    }

    /// Creates a text frame.
    pub fn text(payload: impl AsRef<[u8]>) -> Self {
        Self::new(OpCode::Text, payload)
    }

    /// Creates a binary frame.
    pub fn binary(payload: impl AsRef<[u8]>) -> Self {
        Self::new(OpCode::Binary, payload)
    }

    /// Creates a ping frame.
    pub fn ping(payload: impl AsRef<[u8]>) -> Self {
        Self::new(OpCode::Ping, payload)
    }

    /// Creates a pong frame, usually echoing the payload of a received ping.
    pub fn pong(payload: impl AsRef<[u8]>) -> Self {
        Self::new(OpCode::Pong, payload)
    }

    /// Returns the masking key, if the frame has been masked.
    #[inline]
    pub fn mask_key(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// Masks the payload with a fresh random key.
    ///
    /// Masking an already masked frame is a no-op.
    pub fn mask(&mut self) {
        if self.mask.is_none() {
            let key: [u8; 4] = rand::random();
            self.mask_with(key);
        }
    }

    /// Masks the payload with the given key.
    pub(crate) fn mask_with(&mut self, key: [u8; 4]) {
        crate::mask::apply_mask(&mut self.payload, key);
        self.mask = Some(key);
    }

    /// Formats the frame header into `head` and returns the number of bytes written.
    ///
    /// The length uses the smallest form that fits: 7 bits up to 125, then 16 bits up to
    /// 65535, then 64 bits. The mask flag and key are written when the frame is masked.
    ///
    /// # Panics
    /// Panics if `head` is shorter than [`MAX_HEAD_SIZE`].
    pub(crate) fn fmt_head(&self, head: &mut [u8]) -> usize {
        head[0] = 0x80 | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len <= 125 {
            head[1] = len as u8;
            2
        } else if len <= 65535 {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        if let Some(mask) = self.mask {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&mask);
            size + 4
        } else {
            size
        }
    }
}

/// A frame received from the server.
///
/// `elapsed` measures the receive operation that produced the message, from the moment the
/// client started waiting until the last payload byte was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The operation code of the received frame.
    pub opcode: OpCode,
    /// The frame payload, exactly as sent by the server.
    pub payload: Bytes,
    /// Time spent receiving this message.
    pub elapsed: Duration,
}

impl Message {
    pub(crate) fn new(opcode: OpCode, payload: Bytes, elapsed: Duration) -> Self {
        Self {
            opcode,
            payload,
            elapsed,
        }
    }

    /// Returns the payload as UTF-8 text, or `None` if it is not valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Deserializes the payload as JSON.
    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    pub fn json<'a, T: serde::Deserialize<'a>>(&'a self) -> crate::Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Converts a `Message` into a tuple of `(OpCode, Bytes)`.
impl From<Message> for (OpCode, Bytes) {
    fn from(val: Message) -> Self {
        (val.opcode, val.payload)
    }
}
