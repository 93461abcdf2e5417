//! Framing codec for netpipe: the V1 (legacy) and V2 (current) message
//! envelopes, plus the shared error taxonomy and opaque `Message` type
//! every other crate in this workspace builds on.

pub mod error;
pub mod frame;
pub mod message;
pub mod version;

pub use error::{InvalidArgument, NetpipeError, Result};
pub use frame::{
    decode_auto, decode_v2, encode_v1, encode_v2, Envelope, EnvelopeFlags, MessageType,
    V1_HEADER_LEN, V2_HEADER_LEN,
};
pub use message::{
    append_u32_be, check_payload_len, decode_u32_be, encode_u32_be, Message,
    DEFAULT_MAX_MESSAGE_SIZE,
};
pub use version::{is_protocol_supported, protocol_name, PROTOCOL_VERSION_1, PROTOCOL_VERSION_2};
