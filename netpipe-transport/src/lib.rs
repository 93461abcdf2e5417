pub mod framing;
pub mod mem;
pub mod stream;

pub use framing::{read_frame, write_frame};
pub use mem::MemStream;
pub use stream::Stream;
