//! The opaque payload type and the big-endian integer helpers every framed
//! layer above this one builds on.

use crate::error::{InvalidArgument, NetpipeError, Result};

/// An ordered sequence of bytes, 0..=MAX_MESSAGE_SIZE long.
pub type Message = Vec<u8>;

/// Process-wide cap on both inbound and outbound payload sizes. A receiver
/// MUST reject any framed payload whose declared length exceeds this
/// before allocating the receive buffer.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

#[inline]
pub fn encode_u32_be(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

#[inline]
pub fn decode_u32_be(bytes: &[u8]) -> u32 {
    debug_assert!(bytes.len() >= 4);
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[inline]
pub fn append_u32_be(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&encode_u32_be(value));
}

/// Validate a declared payload length against the process-wide cap,
/// before any allocation happens.
pub fn check_payload_len(declared: usize, max: usize) -> Result<()> {
    if declared > max {
        return Err(NetpipeError::InvalidArgument(InvalidArgument::PayloadTooLarge {
            len: declared,
            max,
        }));
    }
    Ok(())
}
