//! Protocol version constants and helpers: small, but load-bearing for
//! `decode_auto`.

pub const PROTOCOL_VERSION_1: u8 = 1;
pub const PROTOCOL_VERSION_2: u8 = 2;

pub const LIBRARY_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn is_protocol_supported(version: u8) -> bool {
    matches!(version, PROTOCOL_VERSION_1 | PROTOCOL_VERSION_2)
}

pub fn protocol_name(version: u8) -> &'static str {
    match version {
        PROTOCOL_VERSION_1 => "netpipe/1 (legacy)",
        PROTOCOL_VERSION_2 => "netpipe/2",
        _ => "unknown",
    }
}
