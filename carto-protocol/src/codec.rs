//! Encoder and streaming decoder for frames and messages.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::Message;
use bytes::BytesMut;

/// Encodes messages and raw payloads into wire bytes.
pub struct Encoder;

impl Encoder {
    /// Encodes a raw type and payload: big-endian `size`, big-endian `type`,
    /// then the payload.
    pub fn encode(msg_type: u16, payload: &[u8]) -> Result<BytesMut, ProtocolError> {
        Frame::new(msg_type, payload.to_vec()).encode()
    }

    /// Encodes a typed message.
    pub fn encode_message(message: &Message) -> Result<BytesMut, ProtocolError> {
        message.encode()
    }

    /// Encodes a sequence of messages back to back into one buffer.
    pub fn encode_batch(messages: &[Message]) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        for message in messages {
            message.to_frame().encode_into(&mut buf)?;
        }
        Ok(buf)
    }
}

/// Accumulates received bytes and carves frames out of them.
///
/// The internal buffer is reused across frames, so decoded payloads are
/// cheap reference-counted slices of it.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_capacity(4096)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode_from(&mut self.buffer)
    }

    /// Attempts to decode the next typed message from the buffer.
    pub fn decode_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => Message::from_frame(&frame).map(Some),
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
