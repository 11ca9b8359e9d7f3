//! Binary frame format.
//!
//! Frame layout (4 bytes header + payload, big-endian, no padding):
//!
//! ```text
//! +---------+---------+---------------------+
//! |  size   |  type   | payload             |
//! | 2 bytes | 2 bytes | size - 2 bytes      |
//! +---------+---------+---------------------+
//! ```
//!
//! `size` counts the type field plus the payload, so the smallest legal
//! frame has `size == 2` and no payload.

use crate::error::ProtocolError;
use crate::message::MessageType;
use crate::{MAX_PAYLOAD_SIZE, MIN_FRAME_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Length of the `size` prefix in bytes.
pub const SIZE_PREFIX_LEN: usize = 2;

/// Size of the fixed frame header in bytes (size + type).
pub const FRAME_HEADER_SIZE: usize = 4;

/// A single wire message.
///
/// The type is kept as the raw 16-bit value so that frames carrying types
/// this build does not know about can still be decoded and skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw message type.
    pub msg_type: u16,
    /// Type-specific payload.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame with the given type and payload.
    pub fn new(msg_type: impl Into<u16>, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: payload.into(),
        }
    }

    /// Creates a frame that carries no payload.
    pub fn empty(msg_type: impl Into<u16>) -> Self {
        Self::new(msg_type, Bytes::new())
    }

    /// Returns the message type if it is part of the known catalogue.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.msg_type).ok()
    }

    /// Value of the `size` field for this frame.
    pub fn size(&self) -> usize {
        MIN_FRAME_SIZE as usize + self.payload.len()
    }

    /// Number of bytes this frame occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        SIZE_PREFIX_LEN + self.size()
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        buf.reserve(self.encoded_len());
        buf.put_u16(self.size() as u16);
        buf.put_u16(self.msg_type);
        buf.put_slice(&self.payload);
        Ok(())
    }

    /// Decodes exactly one frame from the start of `buf`.
    ///
    /// Trailing bytes after the frame are ignored. Nothing is consumed: the
    /// caller's buffer is left untouched whether decoding succeeds or not.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < SIZE_PREFIX_LEN {
            return Err(ProtocolError::IncompleteLengthPrefix {
                available: buf.len(),
            });
        }

        let size = u16::from_be_bytes([buf[0], buf[1]]);
        if size < MIN_FRAME_SIZE {
            return Err(ProtocolError::InvalidSize(size));
        }

        let body = &buf[SIZE_PREFIX_LEN..];
        if body.len() < size as usize {
            return Err(ProtocolError::IncompleteFrame {
                declared: size,
                available: body.len(),
            });
        }

        let msg_type = u16::from_be_bytes([body[0], body[1]]);
        let payload = Bytes::copy_from_slice(&body[2..size as usize]);

        Ok(Self { msg_type, payload })
    }

    /// Carves the next frame off the front of a streaming buffer.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded, `Ok(None)`
    /// if more data is needed. A frame whose `size` is below the minimum is
    /// consumed and reported as [`ProtocolError::InvalidSize`] so the stream
    /// stays aligned on the next frame.
    pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < SIZE_PREFIX_LEN {
            return Ok(None);
        }

        let size = u16::from_be_bytes([buf[0], buf[1]]);
        let total_len = SIZE_PREFIX_LEN + size as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        if size < MIN_FRAME_SIZE {
            buf.advance(total_len);
            return Err(ProtocolError::InvalidSize(size));
        }

        buf.advance(SIZE_PREFIX_LEN);
        let msg_type = buf.get_u16();
        let payload = buf.split_to(size as usize - 2).freeze();

        Ok(Some(Self { msg_type, payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_robot_position_bytes() {
        let frame = Frame::new(MessageType::SetRobotPosition, vec![3u8, 7]);
        let encoded = frame.encode().unwrap();
        assert_eq!(&encoded[..], &[0x00, 0x04, 0x05, 0x00, 0x03, 0x07]);

        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded.message_type(), Some(MessageType::SetRobotPosition));
        assert_eq!(decoded.payload.as_ref(), &[3, 7]);
    }

    #[test]
    fn test_size_prefix_counts_type_and_payload() {
        for len in [0usize, 1, 2, 3, 200] {
            let frame = Frame::new(0x0100u16, vec![0xAA; len]);
            let encoded = frame.encode().unwrap();
            let size = u16::from_be_bytes([encoded[0], encoded[1]]) as usize;
            assert_eq!(size, 2 + len);
            assert_eq!(encoded.len(), frame.encoded_len());
        }
    }

    #[test]
    fn test_empty_payload() {
        let frame = Frame::empty(MessageType::MoveDone);
        let encoded = frame.encode().unwrap();
        assert_eq!(&encoded[..], &[0x00, 0x02, 0x03, 0x00]);

        let decoded = Frame::decode(&encoded).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_decode_missing_length_prefix() {
        assert_eq!(
            Frame::decode(&[]),
            Err(ProtocolError::IncompleteLengthPrefix { available: 0 })
        );
        assert_eq!(
            Frame::decode(&[0x00]),
            Err(ProtocolError::IncompleteLengthPrefix { available: 1 })
        );
    }

    #[test]
    fn test_decode_truncated_frame() {
        let buf = [0x00, 0x04, 0x05, 0x00, 0x03];
        let result = Frame::decode(&buf);
        assert_eq!(
            result,
            Err(ProtocolError::IncompleteFrame {
                declared: 4,
                available: 3
            })
        );
        assert!(result.unwrap_err().is_malformed());
    }

    #[test]
    fn test_decode_invalid_size() {
        let result = Frame::decode(&[0x00, 0x01, 0x05]);
        assert_eq!(result, Err(ProtocolError::InvalidSize(1)));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let buf = [0x00, 0x02, 0x06, 0x00, 0xFF, 0xFF];
        let decoded = Frame::decode(&buf).unwrap();
        assert_eq!(decoded.message_type(), Some(MessageType::StopRobot));
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_unknown_type_still_decodes() {
        let frame = Frame::new(0x0900u16, vec![1u8]);
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.msg_type, 0x0900);
        assert_eq!(decoded.message_type(), None);
    }

    #[test]
    fn test_frame_too_large() {
        let frame = Frame::new(0x0100u16, vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(
            frame.encode(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));

        let frame = Frame::new(0x0100u16, vec![0u8; MAX_PAYLOAD_SIZE]);
        let encoded = frame.encode().unwrap();
        assert_eq!(&encoded[..2], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_decode_from_partial() {
        let encoded = Frame::new(MessageType::SendRobotPosition, vec![1u8, 2, 3])
            .encode()
            .unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encoded[..1]);
        assert!(Frame::decode_from(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[1..5]);
        assert!(Frame::decode_from(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 5);

        buf.extend_from_slice(&encoded[5..]);
        let frame = Frame::decode_from(&mut buf).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), &[1, 2, 3]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_from_multiple_frames() {
        let mut buf = BytesMut::new();
        Frame::empty(MessageType::MoveDone)
            .encode_into(&mut buf)
            .unwrap();
        Frame::new(MessageType::SetObstaclePosition, vec![4u8, 5])
            .encode_into(&mut buf)
            .unwrap();

        let first = Frame::decode_from(&mut buf).unwrap().unwrap();
        assert_eq!(first.message_type(), Some(MessageType::MoveDone));

        let second = Frame::decode_from(&mut buf).unwrap().unwrap();
        assert_eq!(second.message_type(), Some(MessageType::SetObstaclePosition));
        assert_eq!(second.payload.as_ref(), &[4, 5]);

        assert!(Frame::decode_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_from_skips_undersized_frame() {
        let mut buf = BytesMut::from(&[0x00, 0x01, 0xEE][..]);
        Frame::empty(MessageType::StopRobot)
            .encode_into(&mut buf)
            .unwrap();

        let result = Frame::decode_from(&mut buf);
        assert!(matches!(result, Err(ProtocolError::InvalidSize(1))));

        let frame = Frame::decode_from(&mut buf).unwrap().unwrap();
        assert_eq!(frame.message_type(), Some(MessageType::StopRobot));
    }
}
