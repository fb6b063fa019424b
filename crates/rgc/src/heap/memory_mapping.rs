//! Memory Mapping - Region-Aligned Backing Store for the Space
//!
//! The region space needs a mapping whose begin and end are both aligned to
//! the region size, so that `addr / region_size` identifies a region and the
//! optional read-barrier table can index by region. The OS only guarantees
//! page alignment, so the mapping over-reserves one extra region and the
//! aligned sub-range of exactly `capacity` bytes is carved out of it.
//!
//! ```text
//!   base                 begin                              end      base+len
//!    |<-- slack -->|<---------- capacity (aligned) ---------->|<-slack->|
//! ```
//!
//! This is the only module that touches the mapped bytes directly.

use crate::error::{RgcError, Result};
use crate::heap::page;
use crate::util::Alignment;
use memmap2::{MmapMut, MmapOptions};

/// HeapMapping - anonymous read/write mapping with a region-aligned window
pub struct HeapMapping {
    /// Inner mmap handle, kept alive for the lifetime of the space
    _mmap: MmapMut,

    /// Start of the whole reservation
    base: *mut u8,

    /// Region-aligned start of the usable window
    begin: usize,

    /// Usable size in bytes
    capacity: usize,
}

impl HeapMapping {
    /// Reserve an anonymous mapping of `capacity` bytes aligned to `region_size`
    ///
    /// # Arguments
    /// * `name` - Name of the space, for diagnostics
    /// * `capacity` - Usable size, must be a multiple of `region_size`
    /// * `region_size` - Alignment of both ends of the window
    ///
    /// # Returns
    /// * `Ok(Self)` - Aligned mapping
    /// * `Err(RgcError::InvalidArgument)` - Capacity not region aligned
    /// * `Err(RgcError::VirtualMemoryError)` - The OS refused the mapping
    pub fn anonymous(name: &str, capacity: usize, region_size: usize) -> Result<Self> {
        if capacity == 0 || !Alignment::is_aligned(capacity, region_size) {
            return Err(RgcError::InvalidArgument(format!(
                "capacity ({}) of {} must be a non-zero multiple of the region size ({})",
                capacity, name, region_size
            )));
        }

        // Ask for one extra region so the window can be aligned wherever the
        // OS places the mapping.
        let reserve = capacity
            .checked_add(region_size)
            .map(page::align_to_page)
            .ok_or_else(|| {
                RgcError::VirtualMemoryError(format!(
                    "capacity ({}) + region size ({}) overflows usize",
                    capacity, region_size
                ))
            })?;

        let mut mmap = MmapOptions::new().len(reserve).map_anon().map_err(|e| {
            log::error!(
                "Failed to allocate pages for {} of size {} bytes: {}",
                name,
                capacity,
                e
            );
            RgcError::VirtualMemoryError(format!("Failed to create anonymous mapping: {}", e))
        })?;

        let base_ptr = mmap.as_mut_ptr();
        let base = base_ptr as usize;
        let begin = Alignment::align_up(base, region_size);
        debug_assert!(begin + capacity <= base + reserve);

        log::debug!(
            "{}: mapped {:#x}-{:#x}, window {:#x}-{:#x}",
            name,
            base,
            base + reserve,
            begin,
            begin + capacity
        );

        Ok(Self {
            _mmap: mmap,
            base: base_ptr,
            begin,
            capacity,
        })
    }

    /// Region-aligned begin of the usable window
    pub fn begin(&self) -> usize {
        self.begin
    }

    /// End (exclusive) of the usable window
    pub fn end(&self) -> usize {
        self.begin + self.capacity
    }

    /// Usable size in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check if address is inside the usable window
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.begin && addr < self.end()
    }

    /// Zero `[addr, addr + len)` and hand its pages back to the OS
    ///
    /// The range must lie inside the window and nothing may still reference
    /// objects in it. On unix the pages are dropped with `MADV_DONTNEED`, which
    /// makes them read back as zero; elsewhere they are zeroed in place.
    pub fn release(&self, addr: usize, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        if addr < self.begin || addr.saturating_add(len) > self.end() {
            return Err(RgcError::InvalidArgument(format!(
                "release range {:#x}+{} outside mapping {:#x}-{:#x}",
                addr,
                len,
                self.begin,
                self.end()
            )));
        }

        let offset = addr - self.base as usize;
        // SAFETY: the range was bounds-checked against the window, which lies
        // inside the reservation; the region lock holder guarantees no live
        // object remains in it.
        unsafe {
            let ptr = self.base.add(offset);
            Self::zero_and_release(ptr, len);
        }
        Ok(())
    }

    #[cfg(unix)]
    unsafe fn zero_and_release(ptr: *mut u8, len: usize) {
        if page::is_page_aligned(ptr as usize) && page::is_page_aligned(len) {
            let rc = libc::madvise(ptr as *mut libc::c_void, len, libc::MADV_DONTNEED);
            if rc == 0 {
                return;
            }
            log::warn!("madvise(MADV_DONTNEED) failed at {:p}, zeroing instead", ptr);
        }
        std::ptr::write_bytes(ptr, 0, len);
    }

    #[cfg(not(unix))]
    unsafe fn zero_and_release(ptr: *mut u8, len: usize) {
        std::ptr::write_bytes(ptr, 0, len);
    }
}

// The mapping is only mutated through `release`, whose callers hold the
// region lock; handing out raw addresses is the space's business.
unsafe impl Send for HeapMapping {}
unsafe impl Sync for HeapMapping {}
