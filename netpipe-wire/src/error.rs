use core::fmt;

/// Error taxonomy shared by every layer of this crate family.
///
/// Kept as a hand-rolled enum with manual `Display`/`Error` impls rather
/// than a `thiserror` derive, matching how errors are built throughout
/// this stack.
#[derive(Debug)]
pub enum NetpipeError {
    /// A `recv` or `call` waited longer than permitted. Non-fatal: the
    /// channel remains usable afterward.
    Timeout,
    /// The peer closed the channel, or a method/request id lookup missed.
    NotFound(String),
    /// Malformed message, oversized payload, path too long, duplicate
    /// registration, mismatched request id, or decode failure.
    InvalidArgument(InvalidArgument),
    /// Underlying transport failure, allocation failure, or a generic
    /// catch-all for OS-level errors.
    IoError(String),
}

#[derive(Debug)]
pub enum InvalidArgument {
    FrameTooShort { len: usize, min: usize },
    VersionMismatch { expected: u8, got: u8 },
    LengthMismatch { declared: u32, actual: usize },
    PayloadTooLarge { len: usize, max: usize },
    UnrecognizedType(u8),
    DuplicateMethod(u32),
    UnknownMethod(u32),
    RequestIdMismatch { expected: u32, got: u32 },
    NameTooLong { len: usize, max: usize },
    MalformedEndpoint(String),
}

impl fmt::Display for NetpipeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetpipeError::Timeout => write!(f, "operation timed out"),
            NetpipeError::NotFound(msg) => write!(f, "not found: {msg}"),
            NetpipeError::InvalidArgument(detail) => write!(f, "invalid argument: {detail}"),
            NetpipeError::IoError(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl fmt::Display for InvalidArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidArgument::FrameTooShort { len, min } => {
                write!(f, "frame too short: {len} bytes, need at least {min}")
            }
            InvalidArgument::VersionMismatch { expected, got } => {
                write!(f, "version mismatch: expected {expected}, got {got}")
            }
            InvalidArgument::LengthMismatch { declared, actual } => {
                write!(f, "declared length {declared} does not match {actual} bytes on the wire")
            }
            InvalidArgument::PayloadTooLarge { len, max } => {
                write!(f, "payload of {len} bytes exceeds the {max}-byte limit")
            }
            InvalidArgument::UnrecognizedType(t) => write!(f, "unrecognized message type {t}"),
            InvalidArgument::DuplicateMethod(id) => write!(f, "method {id} is already registered"),
            InvalidArgument::UnknownMethod(id) => write!(f, "No handler for method_id: {id}"),
            InvalidArgument::RequestIdMismatch { expected, got } => {
                write!(f, "request id mismatch: expected {expected}, got {got}")
            }
            InvalidArgument::NameTooLong { len, max } => {
                write!(f, "name of {len} bytes exceeds the {max}-byte platform limit")
            }
            InvalidArgument::MalformedEndpoint(msg) => write!(f, "malformed endpoint: {msg}"),
        }
    }
}

impl std::error::Error for NetpipeError {}

pub type Result<T> = core::result::Result<T, NetpipeError>;
