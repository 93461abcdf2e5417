pub use core::hint::spin_loop;
pub use core::sync::atomic::{AtomicU64, Ordering};

#[cfg(any(test, feature = "std"))]
pub use std::thread;
