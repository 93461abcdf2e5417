//! A single-producer/single-consumer byte ring, laid out exactly as a
//! shared-memory bidirectional channel's wire format requires:
//!
//! ```text
//! write_pos (u64, atomic) | read_pos (u64, atomic) | buffer_size (u64) | data[buffer_size - 24]
//! ```
//!
//! `write_pos` and `read_pos` are monotonic logical positions; the physical
//! byte at logical position `p` lives at `data[p % capacity]`. The producer
//! stores `write_pos` with `Release` after writing; the consumer loads it
//! with `Acquire` before reading and stores `read_pos` with `Release` after
//! committing a read. That is the entire synchronization contract: with
//! exactly one producer and one consumer there is no ABA hazard and no CAS
//! is needed on the hot path.
//!
//! This type does not block. Blocking-with-poll on a configured timeout is
//! the transport layer's job (it knows about wall-clock deadlines); this
//! layer only ever reports how many bytes it could move *right now*.

use crate::region::Region;
use crate::sync::{AtomicU64, Ordering};

/// Size in bytes of [`ByteRingHeader`] as laid out in shared memory.
pub const HEADER_LEN: usize = 24;

#[repr(C)]
pub struct ByteRingHeader {
    pub write_pos: AtomicU64,
    pub read_pos: AtomicU64,
    pub buffer_size: u64,
}

const _: () = assert!(core::mem::size_of::<ByteRingHeader>() == HEADER_LEN);

impl ByteRingHeader {
    /// Initialize a freshly mapped header. `buffer_size` is the *total*
    /// region size including this header; the usable ring capacity is
    /// `buffer_size - HEADER_LEN`.
    pub fn init(&mut self, buffer_size: u64) {
        assert!(
            buffer_size as usize > HEADER_LEN,
            "buffer_size must exceed the header size"
        );
        self.write_pos = AtomicU64::new(0);
        self.read_pos = AtomicU64::new(0);
        self.buffer_size = buffer_size;
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.buffer_size - HEADER_LEN as u64
    }
}

/// A ring attached to a region. `region` spans the header and the data
/// area; `base_offset` is where the header starts within the region (the
/// bidirectional channel stores two of these, back to back, or in
/// separate mapped files).
pub struct ByteRing {
    region: Region,
    base_offset: usize,
}

unsafe impl Send for ByteRing {}
unsafe impl Sync for ByteRing {}

impl ByteRing {
    /// Initialize a new ring at `base_offset` within `region`, spanning
    /// `total_size` bytes (header + data area).
    ///
    /// # Safety
    ///
    /// The region must be exclusively owned (no other initializer or
    /// reader/writer racing) during this call, and `[base_offset,
    /// base_offset + total_size)` must lie within the region.
    pub unsafe fn init(region: Region, base_offset: usize, total_size: u64) -> Self {
        let header = unsafe { region.get_mut::<ByteRingHeader>(base_offset) };
        header.init(total_size);
        Self { region, base_offset }
    }

    /// Attach to an already-initialized ring.
    ///
    /// # Safety
    ///
    /// `[base_offset, base_offset + header.buffer_size)` must hold a
    /// previously-initialized `ByteRingHeader` and data area.
    pub unsafe fn attach(region: Region, base_offset: usize) -> Self {
        Self { region, base_offset }
    }

    #[inline]
    fn header(&self) -> &ByteRingHeader {
        unsafe { self.region.get::<ByteRingHeader>(self.base_offset) }
    }

    #[inline]
    fn data_start(&self) -> usize {
        self.base_offset + HEADER_LEN
    }

    pub fn capacity(&self) -> u64 {
        self.header().capacity()
    }

    pub fn split(&self) -> (ByteRingProducer<'_>, ByteRingConsumer<'_>) {
        (ByteRingProducer { ring: self }, ByteRingConsumer { ring: self })
    }
}

pub struct ByteRingProducer<'a> {
    ring: &'a ByteRing,
}

pub struct ByteRingConsumer<'a> {
    ring: &'a ByteRing,
}

impl<'a> ByteRingProducer<'a> {
    /// Bytes currently free to write.
    pub fn available(&self) -> u64 {
        let header = self.ring.header();
        let write_pos = header.write_pos.load(Ordering::Relaxed);
        let read_pos = header.read_pos.load(Ordering::Acquire);
        header.capacity() - (write_pos - read_pos)
    }

    /// Write as many of `data`'s bytes as currently fit, committing the
    /// new `write_pos` with `Release`. Returns the number of bytes
    /// actually written, which may be less than `data.len()` (including
    /// zero) if the ring is full or near-full.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let header = self.ring.header();
        let capacity = header.capacity();
        let write_pos = header.write_pos.load(Ordering::Relaxed);
        let read_pos = header.read_pos.load(Ordering::Acquire);
        let free = capacity - (write_pos - read_pos);
        let n = core::cmp::min(free, data.len() as u64) as usize;
        if n == 0 {
            return 0;
        }

        let wrap_start = self.ring.data_start();
        let offset = wrap_start + (write_pos % capacity) as usize;
        unsafe {
            self.ring
                .region
                .write_wrapping(wrap_start, offset, &data[..n]);
        }
        header
            .write_pos
            .store(write_pos + n as u64, Ordering::Release);
        n
    }
}

impl<'a> ByteRingConsumer<'a> {
    /// Bytes currently available to read.
    pub fn available(&self) -> u64 {
        let header = self.ring.header();
        let write_pos = header.write_pos.load(Ordering::Acquire);
        let read_pos = header.read_pos.load(Ordering::Relaxed);
        write_pos - read_pos
    }

    /// Copy up to `buf.len()` available bytes into `buf` *without*
    /// advancing `read_pos`. Returns the number of bytes copied. Callers
    /// that need the whole of `buf` filled before committing (e.g. a
    /// framed message whose length prefix has been read but whose payload
    /// hasn't fully arrived) should call this repeatedly until the
    /// returned length matches, then call [`commit_read`](Self::commit_read).
    pub fn peek(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let header = self.ring.header();
        let capacity = header.capacity();
        let write_pos = header.write_pos.load(Ordering::Acquire);
        let read_pos = header.read_pos.load(Ordering::Relaxed);
        let avail = write_pos - read_pos;
        let n = core::cmp::min(avail, buf.len() as u64) as usize;
        if n == 0 {
            return 0;
        }

        let wrap_start = self.ring.data_start();
        let offset = wrap_start + (read_pos % capacity) as usize;
        unsafe {
            self.ring
                .region
                .read_wrapping(wrap_start, offset, &mut buf[..n]);
        }
        n
    }

    /// Advance `read_pos` by `n` bytes (must be `<= available()`),
    /// publishing the advance with `Release`.
    pub fn commit_read(&mut self, n: usize) {
        let header = self.ring.header();
        let read_pos = header.read_pos.load(Ordering::Relaxed);
        header
            .read_pos
            .store(read_pos + n as u64, Ordering::Release);
    }

    /// Convenience: peek and commit in one step, for callers that don't
    /// need the partial-read/no-commit distinction.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.peek(buf);
        self.commit_read(n);
        n
    }
}
