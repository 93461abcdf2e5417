//! The shared-memory bidirectional `Stream`. Two SPSC byte rings plus a
//! connection queue, see `conn_queue` for the establishment handshake.

use std::path::{Path, PathBuf};
use std::time::Duration;

use netpipe_wire::{check_payload_len, NetpipeError, Result, DEFAULT_MAX_MESSAGE_SIZE};
use netpipe_transport::stream::Stream;
use shm_primitives::byte_ring::ByteRing;
use tracing::{debug, trace, warn};

use crate::conn_queue::{self, ConnQueue};
use crate::mapping::ShmMapping;

/// How long to sleep between polls of the ring or the connection queue
/// counter while waiting for data, space, or an incoming connection.
pub const POLL_INTERVAL: Duration = Duration::from_micros(5);

struct RingHandle {
    ring: ByteRing,
    mapping: ShmMapping,
}

/// A connected endpoint of a shared-memory bidirectional channel.
pub struct ShmStream {
    /// Ring this side writes to.
    outgoing: RingHandle,
    /// Ring this side reads from.
    incoming: RingHandle,
    recv_timeout: Option<Duration>,
    max_message_size: usize,
    connected: bool,
    /// Whether this side created the per-connection rings and is
    /// therefore responsible for unlinking them on close.
    owns_rings: bool,
}

/// A listening shared-memory endpoint: holds the connection queue and
/// accepts new per-connection ring pairs.
pub struct ShmListener {
    base_dir: PathBuf,
    channel: String,
    buffer_size: u64,
    connq: ConnQueue,
    next_to_serve: u32,
}

impl ShmStream {
    fn effective_max_message_size(buffer_size: u64) -> usize {
        // Maximum logical message size on a SHM channel is buffer_size / 2,
        // so one oversized message can't starve the opposite direction's
        // producer of room to make progress.
        ((buffer_size / 2) as usize).min(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Client side: claim a slot from the server's connection queue and
    /// create this connection's private pair of rings.
    pub async fn connect_shm(base_dir: &Path, channel: &str, buffer_size: u64) -> Result<Self> {
        conn_queue::validate_channel_name(channel)?;
        let connq = ConnQueue::attach(base_dir, channel)?;
        let slot = connq.claim_slot();

        let s2c_path = conn_queue::ring_path(base_dir, channel, slot, "s2c");
        let c2s_path = conn_queue::ring_path(base_dir, channel, slot, "c2s");

        // The client attaches to rings the server creates on accept; poll
        // until the server has caught up to this slot.
        let s2c_mapping = wait_for_mapping(&s2c_path, buffer_size).await?;
        let c2s_mapping = wait_for_mapping(&c2s_path, buffer_size).await?;

        let s2c_ring = unsafe { ByteRing::attach(s2c_mapping.region(), 0) };
        let c2s_ring = unsafe { ByteRing::attach(c2s_mapping.region(), 0) };

        Ok(Self {
            // client reads s2c, writes c2s
            incoming: RingHandle { ring: s2c_ring, mapping: s2c_mapping },
            outgoing: RingHandle { ring: c2s_ring, mapping: c2s_mapping },
            recv_timeout: None,
            max_message_size: Self::effective_max_message_size(buffer_size),
            connected: true,
            owns_rings: false,
        })
    }

    /// Server side: create the connection queue for `channel`.
    pub fn listen_shm(base_dir: &Path, channel: &str, buffer_size: u64) -> Result<ShmListener> {
        conn_queue::validate_channel_name(channel)?;
        let connq = ConnQueue::create(base_dir, channel)?;
        Ok(ShmListener {
            base_dir: base_dir.to_path_buf(),
            channel: channel.to_string(),
            buffer_size,
            connq,
            next_to_serve: 0,
        })
    }

    async fn push_all(&mut self, frame: &[u8]) -> Result<()> {
        let mut offset = 0;
        while offset < frame.len() {
            if !self.connected {
                return Err(NetpipeError::NotFound("stream is closed".to_string()));
            }
            let (mut producer, _consumer) = self.outgoing.ring.split();
            let n = producer.write(&frame[offset..]);
            if n == 0 {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
            offset += n;
        }
        Ok(())
    }

    async fn recv_inner(&mut self) -> Result<Vec<u8>> {
        loop {
            if !self.connected {
                return Err(NetpipeError::NotFound("stream is closed".to_string()));
            }
            let (_producer, consumer) = self.incoming.ring.split();
            if consumer.available() as usize >= 4 {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let mut len_buf = [0u8; 4];
        {
            let (_producer, consumer) = self.incoming.ring.split();
            let n = consumer.peek(&mut len_buf);
            debug_assert_eq!(n, 4);
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        check_payload_len(len, self.max_message_size)?;
        let total = 4 + len;

        loop {
            if !self.connected {
                return Err(NetpipeError::NotFound("stream is closed".to_string()));
            }
            let (_producer, consumer) = self.incoming.ring.split();
            if consumer.available() as usize >= total {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let mut full = vec![0u8; total];
        let (_producer, mut consumer) = self.incoming.ring.split();
        let n = consumer.peek(&mut full);
        debug_assert_eq!(n, total);
        consumer.commit_read(total);
        Ok(full.split_off(4))
    }
}

impl Stream for ShmStream {
    async fn send(&mut self, message: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(NetpipeError::NotFound("stream is closed".to_string()));
        }
        check_payload_len(message.len(), self.max_message_size)?;
        let mut frame = Vec::with_capacity(4 + message.len());
        frame.extend_from_slice(&(message.len() as u32).to_be_bytes());
        frame.extend_from_slice(message);

        let result = match self.recv_timeout {
            Some(d) => tokio::time::timeout(d, self.push_all(&frame))
                .await
                .map_err(|_| NetpipeError::Timeout)
                .and_then(|r| r),
            None => self.push_all(&frame).await,
        };
        if result.is_err() && !matches!(result, Err(NetpipeError::Timeout)) {
            self.connected = false;
        }
        result
    }

    async fn recv(&mut self) -> Result<Vec<u8>> {
        let result = match self.recv_timeout {
            Some(d) => match tokio::time::timeout(d, self.recv_inner()).await {
                Ok(inner) => inner,
                Err(_) => return Err(NetpipeError::Timeout),
            },
            None => self.recv_inner().await,
        };
        if let Err(ref e) = result {
            if !matches!(e, NetpipeError::Timeout) {
                self.connected = false;
            }
        }
        result
    }

    fn set_recv_timeout(&mut self, timeout: Option<Duration>) {
        self.recv_timeout = timeout;
    }

    async fn close(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        if self.owns_rings {
            self.incoming.mapping.unlink();
            self.outgoing.mapping.unlink();
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl ShmListener {
    /// Poll the connection queue; when a client has claimed the next
    /// unserved slot, create that slot's rings (the server is the
    /// allocator and therefore the unlink owner) and return the
    /// connected stream.
    pub async fn accept(&mut self) -> Result<ShmStream> {
        loop {
            if self.connq.claimed_count() > self.next_to_serve {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        let slot = self.next_to_serve;
        self.next_to_serve += 1;

        let s2c_path = conn_queue::ring_path(&self.base_dir, &self.channel, slot, "s2c");
        let c2s_path = conn_queue::ring_path(&self.base_dir, &self.channel, slot, "c2s");
        let total_size = self.buffer_size;

        let s2c_mapping = ShmMapping::create(&s2c_path, total_size as usize)?;
        let c2s_mapping = ShmMapping::create(&c2s_path, total_size as usize)?;
        let s2c_ring = unsafe { ByteRing::init(s2c_mapping.region(), 0, total_size) };
        let c2s_ring = unsafe { ByteRing::init(c2s_mapping.region(), 0, total_size) };

        debug!(channel = %self.channel, slot, "accepted shared-memory connection");

        Ok(ShmStream {
            // server writes s2c, reads c2s
            outgoing: RingHandle { ring: s2c_ring, mapping: s2c_mapping },
            incoming: RingHandle { ring: c2s_ring, mapping: c2s_mapping },
            recv_timeout: None,
            max_message_size: ShmStream::effective_max_message_size(total_size),
            connected: true,
            owns_rings: true,
        })
    }

    pub fn close(&self) {
        self.connq.unlink();
    }
}

async fn wait_for_mapping(path: &Path, size: u64) -> Result<ShmMapping> {
    loop {
        match ShmMapping::attach(path, size as usize) {
            Ok(mapping) => return Ok(mapping),
            Err(_) if !path.exists() => {
                trace!(path = %path.display(), "waiting for server to accept");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to attach to shared-memory region");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}
