//! Memory-mapped byte counting.
//!
//! The target file is mapped read-only and scanned in fixed-size chunks.
//! The shutdown flag is checked between chunks so a termination request
//! interrupts even a large scan promptly.

use std::ffi::c_void;
use std::fs::File;
use std::num::NonZeroUsize;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::AtomicBool;

use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap};

use crate::error::{Result, SymCountError};
use crate::shutdown::is_requested;

/// Bytes scanned between two cancellation checks.
pub const SCAN_CHUNK: usize = 1 << 20;

/// A read-only private mapping of a whole file.
struct MappedFile {
    ptr: NonNull<c_void>,
    len: usize,
}

impl MappedFile {
    /// Map `len` bytes of `file`. `len` must be the file's current size.
    fn map(file: &File, len: NonZeroUsize) -> nix::Result<Self> {
        // Safety: a fresh private read-only mapping aliases no Rust memory.
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ,
                MapFlags::MAP_PRIVATE,
                file,
                0,
            )?
        };
        Ok(Self {
            ptr,
            len: len.get(),
        })
    }

    fn as_bytes(&self) -> &[u8] {
        // Safety: the mapping is valid for `len` bytes until drop.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().cast::<u8>(), self.len) }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        // Safety: `ptr`/`len` describe exactly the mapping created in `map`.
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            tracing::warn!(error = %e, "Failed to unmap target file");
        }
    }
}

/// Count `symbol` in `bytes`, stopping early if `shutdown` is raised.
///
/// Returns `None` when the scan was interrupted.
pub fn count_symbol(bytes: &[u8], symbol: u8, shutdown: &AtomicBool) -> Option<u64> {
    let mut count = 0u64;
    for chunk in bytes.chunks(SCAN_CHUNK) {
        if is_requested(shutdown) {
            return None;
        }
        count += chunk.iter().filter(|&&b| b == symbol).count() as u64;
    }
    Some(count)
}

/// Open `path`, verify it is a regular file, and count `symbol` in it.
///
/// Returns `Ok(None)` if the scan was interrupted by a termination request.
/// The file handle and mapping are released on every path out.
pub fn count_in_file(path: &Path, symbol: u8, shutdown: &AtomicBool) -> Result<Option<u64>> {
    let file = File::open(path).map_err(|e| SymCountError::io("Error opening file", e))?;
    let metadata = file
        .metadata()
        .map_err(|e| SymCountError::io("Failed to retrieve stat data", e))?;
    if !metadata.is_file() {
        return Err(SymCountError::NotRegularFile(path.to_path_buf()));
    }

    let len = usize::try_from(metadata.len())
        .map_err(|_| SymCountError::InvalidInput(format!("{} is too large to map", path.display())))?;
    let Some(len) = NonZeroUsize::new(len) else {
        // Zero-length mappings are rejected by mmap; an empty file has no matches.
        return Ok((!is_requested(shutdown)).then_some(0));
    };

    let mapping = MappedFile::map(&file, len)
        .map_err(|e| SymCountError::io("Failed mapping file to memory", e))?;
    Ok(count_symbol(mapping.as_bytes(), symbol, shutdown))
}
