//! Encoding and decoding of frames on the wire.
//!
//! The [`Decoder`] is incremental: it returns `Ok(None)` until the buffer holds a full frame,
//! keeping track of how far it got between calls, so it can be fed with reads of any size.
use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{Frame, OpCode, MAX_HEAD_SIZE},
    WebSocketError,
};

/// Largest buffer growth requested at once while waiting for a payload.
const RESERVE_STEP: usize = 64 * 1024;

/// Progress of the decoder within the current frame.
enum ReadState {
    /// The two leading bytes were parsed, waiting for the extended length (if any).
    Length(Header),
    /// The header is complete, waiting for `payload_len` bytes of payload.
    Payload { opcode: OpCode, payload_len: usize },
}

/// Fields of the two leading header bytes.
struct Header {
    opcode: OpCode,
    /// Number of extended length bytes that follow (0, 2 or 8).
    extra: usize,
    /// The 7-bit length selector.
    length_code: u8,
}

/// A raw frame as decoded from the server: opcode and payload.
pub type RawFrame = (OpCode, BytesMut);

/// Decoder for frames sent by a server.
///
/// Servers must never mask their frames, so a set mask bit is a protocol violation. Payloads
/// larger than `max_payload_size` are rejected before any payload byte is buffered.
pub struct Decoder {
    /// Current reading state, `None` when waiting for a new frame.
    state: Option<ReadState>,
    /// Maximum allowed size for the frame payload.
    max_payload_size: usize,
}

impl Decoder {
    /// Creates a new `Decoder` with a specified maximum payload size.
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            state: None,
            max_payload_size,
        }
    }

    /// Returns `true` while a frame has been partially decoded.
    pub fn is_mid_frame(&self) -> bool {
        self.state.is_some()
    }
}

impl codec::Decoder for Decoder {
    type Item = RawFrame;
    type Error = WebSocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state.take() {
                None => {
                    if src.remaining() < 2 {
                        return Ok(None);
                    }

                    if src[1] & 0x80 != 0 {
                        return Err(WebSocketError::Protocol("Mask not support".to_string()));
                    }

                    let opcode = OpCode::try_from(src[0] & 0x0F)?;
                    let length_code = src[1] & 0x7F;
                    let extra = match length_code {
                        126 => 2,
                        127 => 8,
                        _ => 0,
                    };
                    src.advance(2);

                    self.state = Some(ReadState::Length(Header {
                        opcode,
                        extra,
                        length_code,
                    }));
                }
                Some(ReadState::Length(header)) => {
                    if src.remaining() < header.extra {
                        self.state = Some(ReadState::Length(header));
                        return Ok(None);
                    }

                    let payload_len = match header.extra {
                        0 => usize::from(header.length_code),
                        2 => usize::from(src.get_u16()),
                        _ => usize::try_from(src.get_u64())
                            .map_err(|_| WebSocketError::FrameTooLarge)?,
                    };

                    if payload_len > self.max_payload_size {
                        return Err(WebSocketError::FrameTooLarge);
                    }

                    self.state = Some(ReadState::Payload {
                        opcode: header.opcode,
                        payload_len,
                    });
                }
                Some(ReadState::Payload {
                    opcode,
                    payload_len,
                }) => {
                    if src.remaining() < payload_len {
                        // grow in steps, the declared length is not trusted up front
                        src.reserve((payload_len - src.remaining()).min(RESERVE_STEP));
                        self.state = Some(ReadState::Payload {
                            opcode,
                            payload_len,
                        });
                        return Ok(None);
                    }

                    break Ok(Some((opcode, src.split_to(payload_len))));
                }
            }
        }
    }
}

/// Serializes outgoing frames, masking them when masking is enabled.
pub struct Encoder {
    masking: bool,
}

impl Encoder {
    /// Creates an encoder. With `masking` set every frame gets a fresh random key.
    pub fn new(masking: bool) -> Self {
        Self { masking }
    }
}

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, mut frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.masking {
            frame.mask();
        }

        let mut header = [0; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut header[..]);

        dst.reserve(size + frame.payload.len());
        dst.extend_from_slice(&header[..size]);
        dst.extend_from_slice(&frame.payload);

        Ok(())
    }
}

/// Encodes a single final frame into a fresh buffer.
pub fn encode(opcode: OpCode, payload: impl AsRef<[u8]>, masking: bool) -> BytesMut {
    let frame = Frame::new(opcode, payload);
    let mut dst = BytesMut::new();
    // the encoder has no failure path
    let _ = codec::Encoder::encode(&mut Encoder::new(masking), frame, &mut dst);
    dst
}
