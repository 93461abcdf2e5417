pub mod conn_queue;
pub mod mapping;
pub mod stream;

pub use conn_queue::{MAX_CHANNEL_NAME_LEN, validate_channel_name};
pub use mapping::ShmMapping;
pub use stream::{ShmListener, ShmStream, POLL_INTERVAL};
