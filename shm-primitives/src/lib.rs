#![no_std]

#[cfg(any(test, feature = "alloc"))]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod byte_ring;
pub mod region;
pub mod sync;

#[cfg(any(test, feature = "alloc"))]
pub use region::HeapRegion;
pub use byte_ring::{ByteRing, ByteRingConsumer, ByteRingHeader, ByteRingProducer, HEADER_LEN};
pub use region::Region;
