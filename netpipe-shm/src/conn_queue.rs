//! Connection establishment without a kernel listener.
//!
//! A server's `listen_shm` creates a small "connection queue" region
//! holding one counter: the number of slots claimed so far. A client's
//! `connect_shm` atomically claims the next slot (`fetch_add`), then
//! creates its own pair of ring regions named after that slot. The
//! server's `accept()` polls the counter and, each time it advances,
//! attaches to the next unserved slot's rings.
//!
//! This is deliberately the simplest mechanism that works: a bounded
//! array of slots is not needed because nothing is ever stored
//! *in* the connection queue region besides the counter — slot identity
//! is derived from the counter value itself, and the per-slot ring names
//! are computed, not looked up.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use netpipe_wire::{InvalidArgument, NetpipeError, Result};

use crate::mapping::ShmMapping;

#[repr(C)]
pub struct ConnQueueHeader {
    pub claimed: AtomicU32,
}

static_assertions::assert_eq_size!(ConnQueueHeader, u32);

const CONNQ_SIZE: usize = std::mem::size_of::<ConnQueueHeader>();

/// Platform filename component limit this implementation validates
/// against (conservative: the common 255-byte `NAME_MAX`).
pub const PLATFORM_NAME_MAX: usize = 255;
/// Longest suffix any region name appends to the base channel name:
/// `"_4294967295_s2c"` (a u32 slot number plus the ring direction tag).
pub const LONGEST_SUFFIX_LEN: usize = 15;
pub const MAX_CHANNEL_NAME_LEN: usize = PLATFORM_NAME_MAX - LONGEST_SUFFIX_LEN;

pub fn validate_channel_name(name: &str) -> Result<()> {
    if name.len() > MAX_CHANNEL_NAME_LEN {
        return Err(NetpipeError::InvalidArgument(InvalidArgument::NameTooLong {
            len: name.len(),
            max: MAX_CHANNEL_NAME_LEN,
        }));
    }
    Ok(())
}

pub fn connq_path(base_dir: &Path, channel: &str) -> PathBuf {
    base_dir.join(format!("{channel}_connq"))
}

pub fn ring_path(base_dir: &Path, channel: &str, slot: u32, suffix: &str) -> PathBuf {
    base_dir.join(format!("{channel}_{slot}_{suffix}"))
}

pub struct ConnQueue {
    mapping: ShmMapping,
}

impl ConnQueue {
    pub fn create(base_dir: &Path, channel: &str) -> Result<Self> {
        let mapping = ShmMapping::create(&connq_path(base_dir, channel), CONNQ_SIZE)?;
        let header = unsafe { mapping.region().get_mut::<ConnQueueHeader>(0) };
        header.claimed = AtomicU32::new(0);
        Ok(Self { mapping })
    }

    pub fn attach(base_dir: &Path, channel: &str) -> Result<Self> {
        let mapping = ShmMapping::attach(&connq_path(base_dir, channel), CONNQ_SIZE)?;
        Ok(Self { mapping })
    }

    fn header(&self) -> &ConnQueueHeader {
        unsafe { self.mapping.region().get::<ConnQueueHeader>(0) }
    }

    /// Atomically claim the next slot. Used by the client.
    pub fn claim_slot(&self) -> u32 {
        self.header().claimed.fetch_add(1, Ordering::AcqRel)
    }

    /// Number of slots claimed so far. Used by the server's `accept`
    /// poll loop.
    pub fn claimed_count(&self) -> u32 {
        self.header().claimed.load(Ordering::Acquire)
    }

    pub fn unlink(&self) {
        self.mapping.unlink();
    }
}
