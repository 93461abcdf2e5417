//! V1 (legacy) and V2 (current) envelope encoding/decoding.
//!
//! Stateless, thread-safe, allocation-free beyond the output buffer. All
//! multi-byte integers are big-endian; nothing here relies on platform
//! endianness.

use bitflags::bitflags;

use crate::error::{InvalidArgument, NetpipeError, Result};
use crate::message::{check_payload_len, decode_u32_be, encode_u32_be, Message};

pub const V1_HEADER_LEN: usize = 9;
pub const V2_HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Request = 1,
    Response = 2,
    Error = 3,
    StreamData = 4,
    StreamEnd = 5,
    StreamError = 6,
    Cancel = 7,
    Notification = 8,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Request,
            2 => Self::Response,
            3 => Self::Error,
            4 => Self::StreamData,
            5 => Self::StreamEnd,
            6 => Self::StreamError,
            7 => Self::Cancel,
            8 => Self::Notification,
            _ => return None,
        })
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EnvelopeFlags: u16 {
        const STREAMING     = 0x0002;
        const FINAL         = 0x0008;
        const REQUIRES_ACK  = 0x0010;
        const COMPRESSED    = 0x0020;
    }
}

/// A decoded envelope, in V2 shape regardless of which version was
/// actually on the wire (V1 is mapped up via `decode_auto`).
#[derive(Debug, Clone)]
pub struct Envelope {
    pub version: u8,
    pub r#type: MessageType,
    pub flags: EnvelopeFlags,
    pub request_id: u32,
    pub method_id: u32,
    pub payload: Message,
}

/// `request_id ‖ is_error ‖ length ‖ payload`.
pub fn encode_v1(request_id: u32, payload: &[u8], is_error: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(V1_HEADER_LEN + payload.len());
    buf.extend_from_slice(&encode_u32_be(request_id));
    buf.push(is_error as u8);
    buf.extend_from_slice(&encode_u32_be(payload.len() as u32));
    buf.extend_from_slice(payload);
    buf
}

/// `version(=2) ‖ type ‖ flags ‖ request_id ‖ method_id ‖ length ‖ payload`.
pub fn encode_v2(
    request_id: u32,
    method_id: u32,
    payload: &[u8],
    r#type: MessageType,
    flags: EnvelopeFlags,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(V2_HEADER_LEN + payload.len());
    buf.push(2);
    buf.push(r#type as u8);
    buf.extend_from_slice(&flags.bits().to_be_bytes());
    buf.extend_from_slice(&encode_u32_be(request_id));
    buf.extend_from_slice(&encode_u32_be(method_id));
    buf.extend_from_slice(&encode_u32_be(payload.len() as u32));
    buf.extend_from_slice(payload);
    buf
}

struct DecodedV1 {
    request_id: u32,
    is_error: bool,
    payload: Message,
}

fn decode_v1(bytes: &[u8], max_message_size: usize) -> Result<DecodedV1> {
    if bytes.len() < V1_HEADER_LEN {
        return Err(NetpipeError::InvalidArgument(InvalidArgument::FrameTooShort {
            len: bytes.len(),
            min: V1_HEADER_LEN,
        }));
    }
    let request_id = decode_u32_be(&bytes[0..4]);
    let is_error = bytes[4] != 0;
    let declared = decode_u32_be(&bytes[5..9]) as usize;
    let actual = bytes.len() - V1_HEADER_LEN;
    if declared != actual {
        return Err(NetpipeError::InvalidArgument(InvalidArgument::LengthMismatch {
            declared: declared as u32,
            actual,
        }));
    }
    check_payload_len(declared, max_message_size)?;
    Ok(DecodedV1 {
        request_id,
        is_error,
        payload: bytes[V1_HEADER_LEN..].to_vec(),
    })
}

/// Decode a V2 envelope. Fails with `InvalidArgument` if `bytes.len() <
/// 16`, if `version != 2`, or if `16 + declared_length != bytes.len()`.
pub fn decode_v2(bytes: &[u8], max_message_size: usize) -> Result<Envelope> {
    if bytes.len() < V2_HEADER_LEN {
        return Err(NetpipeError::InvalidArgument(InvalidArgument::FrameTooShort {
            len: bytes.len(),
            min: V2_HEADER_LEN,
        }));
    }
    let version = bytes[0];
    if version != 2 {
        return Err(NetpipeError::InvalidArgument(InvalidArgument::VersionMismatch {
            expected: 2,
            got: version,
        }));
    }
    let type_byte = bytes[1];
    let r#type = MessageType::from_u8(type_byte)
        .ok_or(NetpipeError::InvalidArgument(InvalidArgument::UnrecognizedType(type_byte)))?;
    let flags = EnvelopeFlags::from_bits_truncate(u16::from_be_bytes([bytes[2], bytes[3]]));
    let request_id = decode_u32_be(&bytes[4..8]);
    let method_id = decode_u32_be(&bytes[8..12]);
    let declared = decode_u32_be(&bytes[12..16]) as usize;
    let actual = bytes.len() - V2_HEADER_LEN;
    if declared != actual {
        return Err(NetpipeError::InvalidArgument(InvalidArgument::LengthMismatch {
            declared: declared as u32,
            actual,
        }));
    }
    check_payload_len(declared, max_message_size)?;

    Ok(Envelope {
        version,
        r#type,
        flags,
        request_id,
        method_id,
        payload: bytes[V2_HEADER_LEN..].to_vec(),
    })
}

/// Identify V2 if the first byte is 2 and the second is a recognized
/// type; otherwise fall back to V1 and map the result into V2 shape
/// (`type = Response`, `method_id = 0`).
pub fn decode_auto(bytes: &[u8], max_message_size: usize) -> Result<Envelope> {
    if bytes.len() >= 2 && bytes[0] == 2 && MessageType::from_u8(bytes[1]).is_some() {
        return decode_v2(bytes, max_message_size);
    }
    let v1 = decode_v1(bytes, max_message_size)?;
    Ok(Envelope {
        version: 1,
        r#type: if v1.is_error { MessageType::Error } else { MessageType::Response },
        flags: EnvelopeFlags::empty(),
        request_id: v1.request_id,
        method_id: 0,
        payload: v1.payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = crate::message::DEFAULT_MAX_MESSAGE_SIZE;

    #[test]
    fn v1_roundtrip() {
        let encoded = encode_v1(42, b"hello", false);
        let decoded = decode_v1(&encoded, MAX).unwrap();
        assert_eq!(decoded.request_id, 42);
        assert!(!decoded.is_error);
        assert_eq!(decoded.payload, b"hello");
    }

    #[test]
    fn v2_roundtrip() {
        let encoded = encode_v2(7, 3, b"payload", MessageType::Request, EnvelopeFlags::empty());
        let decoded = decode_v2(&encoded, MAX).unwrap();
        assert_eq!(decoded.version, 2);
        assert_eq!(decoded.r#type, MessageType::Request);
        assert_eq!(decoded.request_id, 7);
        assert_eq!(decoded.method_id, 3);
        assert_eq!(decoded.payload, b"payload");
    }

    #[test]
    fn auto_detects_v2() {
        let encoded = encode_v2(1, 0, b"x", MessageType::Request, EnvelopeFlags::empty());
        let decoded = decode_auto(&encoded, MAX).unwrap();
        assert_eq!(decoded.version, 2);
        assert_eq!(decoded.r#type, MessageType::Request);
    }

    #[test]
    fn auto_falls_back_to_v1() {
        let encoded = encode_v1(9, b"legacy", false);
        let decoded = decode_auto(&encoded, MAX).unwrap();
        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.r#type, MessageType::Response);
        assert_eq!(decoded.method_id, 0);
        assert_eq!(decoded.payload, b"legacy");
    }

    #[test]
    fn v1_error_flag_maps_to_error_type() {
        let encoded = encode_v1(9, b"boom", true);
        let decoded = decode_auto(&encoded, MAX).unwrap();
        assert_eq!(decoded.r#type, MessageType::Error);
    }

    #[test]
    fn truncated_v1_length_mismatch_is_invalid_argument() {
        // declared length 10 but only 2 payload bytes follow the header
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&encode_u32_be(1));
        bytes.push(0);
        bytes.extend_from_slice(&encode_u32_be(10));
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        let err = decode_v1(&bytes, MAX).unwrap_err();
        assert!(matches!(
            err,
            NetpipeError::InvalidArgument(InvalidArgument::LengthMismatch { .. })
        ));
    }

    #[test]
    fn oversized_payload_rejected_before_allocation() {
        let encoded = encode_v2(1, 1, b"abc", MessageType::Request, EnvelopeFlags::empty());
        let err = decode_v2(&encoded, 2).unwrap_err();
        assert!(matches!(
            err,
            NetpipeError::InvalidArgument(InvalidArgument::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn frame_shorter_than_header_is_rejected() {
        assert!(matches!(
            decode_v2(&[2, 1, 0], MAX).unwrap_err(),
            NetpipeError::InvalidArgument(InvalidArgument::FrameTooShort { .. })
        ));
    }
}
