use core::ptr::NonNull;

use super::HeapSource;

/// The address range reserved by [`MmapSource::new`] by default.
pub const DEFAULT_MMAP_CAPACITY: usize = 256 << 20;

/// A [`HeapSource`] that reserves a fixed range of anonymous memory with
/// `mmap` up front and hands it out contiguously, like a simulated program
/// break.
///
/// Pages are committed lazily by the operating system on first touch. The
/// whole range is unmapped when the source is dropped.
#[cfg_attr(feature = "doc_cfg", doc(cfg(unix)))]
#[derive(Debug)]
pub struct MmapSource {
    start: NonNull<u8>,
    capacity: usize,
    brk: usize,
}

// Safety: `MmapSource` exclusively owns the mapping.
unsafe impl Send for MmapSource {}

impl MmapSource {
    /// Reserve [`DEFAULT_MMAP_CAPACITY`] bytes.
    #[inline]
    pub fn new() -> Option<Self> {
        Self::with_capacity(DEFAULT_MMAP_CAPACITY)
    }

    /// Reserve at least `capacity` bytes (rounded up to the page size).
    ///
    /// Returns `None` if `mmap` fails.
    pub fn with_capacity(capacity: usize) -> Option<Self> {
        let this = Self::reserve(capacity);
        if this.is_none() {
            log::warn!("mmap of {} bytes failed", capacity);
        }
        this
    }

    /// [`Self::with_capacity`] without logging.
    pub(crate) fn reserve(capacity: usize) -> Option<Self> {
        let page_size_m1 = page_size() - 1;
        let capacity = capacity.checked_add(page_size_m1)? & !page_size_m1;
        if capacity == 0 {
            return None;
        }

        // Safety: Creating a new private anonymous mapping doesn't affect
        //         any existing memory
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                capacity,
                libc::PROT_WRITE | libc::PROT_READ,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return None;
        }

        Some(Self {
            start: NonNull::new(ptr as *mut u8)?,
            capacity,
            brk: 0,
        })
    }

    /// The number of bytes handed out so far.
    #[inline]
    pub fn used(&self) -> usize {
        self.brk
    }

    /// The size of the reserved range.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

unsafe impl HeapSource for MmapSource {
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
        if len > self.capacity - self.brk {
            return None;
        }
        let ptr = self.start.as_ptr().wrapping_add(self.brk);
        self.brk += len;
        NonNull::new(ptr)
    }
}

impl Drop for MmapSource {
    fn drop(&mut self) {
        // Safety: The mapping was created by `with_capacity` and nothing
        //         borrows it past `self`'s lifetime
        unsafe { libc::munmap(self.start.as_ptr() as *mut _, self.capacity) };
    }
}

#[inline]
fn page_size() -> usize {
    // Safety: `sysconf` has no preconditions
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        4096
    } else {
        page_size as usize
    }
}
