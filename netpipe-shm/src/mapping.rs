//! Named, process-shared memory mappings backed by a regular file.
//!
//! Grounded in this stack's `HubMapping`/`HubHost::create` pattern: open
//! (or create) a file, size it with `set_len`, `mmap` it `MAP_SHARED`, and
//! unmap on drop. No kernel listener is involved anywhere in this module;
//! "named" here just means "has a path other processes can open by name".

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr;

use netpipe_wire::{InvalidArgument, NetpipeError, Result};
use shm_primitives::Region;

/// A single memory-mapped region, owning the backing file handle and the
/// mapping itself.
pub struct ShmMapping {
    base_addr: *mut u8,
    size: usize,
    path: PathBuf,
    owner: bool,
    _file: File,
}

unsafe impl Send for ShmMapping {}
unsafe impl Sync for ShmMapping {}

impl ShmMapping {
    /// Create (or truncate-and-recreate) the named region, sized to
    /// `size` bytes. The caller becomes responsible for unlinking it.
    pub fn create(path: &Path, size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| NetpipeError::IoError(format!("opening {}: {e}", path.display())))?;
        file.set_len(size as u64)
            .map_err(|e| NetpipeError::IoError(format!("sizing {}: {e}", path.display())))?;

        let base_addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if base_addr == libc::MAP_FAILED {
            return Err(NetpipeError::IoError(format!(
                "mmap failed for {}: {}",
                path.display(),
                std::io::Error::last_os_error()
            )));
        }

        Ok(Self {
            base_addr: base_addr as *mut u8,
            size,
            path: path.to_path_buf(),
            owner: true,
            _file: file,
        })
    }

    /// Attach to a region a peer already created. Does not take unlink
    /// responsibility.
    pub fn attach(path: &Path, size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| NetpipeError::IoError(format!("opening {}: {e}", path.display())))?;

        let actual_len = file
            .metadata()
            .map_err(|e| NetpipeError::IoError(e.to_string()))?
            .len() as usize;
        if actual_len < size {
            return Err(NetpipeError::InvalidArgument(InvalidArgument::LengthMismatch {
                declared: size as u32,
                actual: actual_len,
            }));
        }

        let base_addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if base_addr == libc::MAP_FAILED {
            return Err(NetpipeError::IoError(format!(
                "mmap failed for {}: {}",
                path.display(),
                std::io::Error::last_os_error()
            )));
        }

        Ok(Self {
            base_addr: base_addr as *mut u8,
            size,
            path: path.to_path_buf(),
            owner: false,
            _file: file,
        })
    }

    pub fn region(&self) -> Region {
        unsafe { Region::from_raw_parts(self.base_addr, self.size) }
    }

    /// Whether closing this mapping should also unlink the backing file.
    pub fn owner(&self) -> bool {
        self.owner
    }

    /// Remove the backing file. Idempotent: a missing file is not an
    /// error, since `close()` may be called twice.
    pub fn unlink(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for ShmMapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base_addr as *mut libc::c_void, self.size);
        }
    }
}
