use core::{
    alloc,
    cell::UnsafeCell,
    ops,
    ptr::{self, NonNull},
};

use crate::{Heap, HeapSource, MmapSource, DEFAULT_MMAP_CAPACITY, GRANULARITY};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use self::unix as os;

type TheHeap = Heap<GlobalSource>;

/// [`MmapSource`] with the heap's log output turned off.
struct GlobalSource(MmapSource);

// Safety: Forwards to `MmapSource`
unsafe impl HeapSource for GlobalSource {
    const LOGGING: bool = false;

    #[inline]
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
        self.0.grow(len)
    }
}

/// [`Heap`] as a global allocator.
///
/// The heap is created on first use on top of an [`MmapSource`] and is
/// guarded by a single process-wide mutex. It doesn't emit log records.
///
/// A request with an alignment greater than [`GRANULARITY`] is served by
/// a block over-allocated by the alignment. The payload is moved up to the
/// next aligned address, and the word preceding it records the block's
/// original address.
///
/// `realloc` first attempts [`Heap::resize_in_place`] and falls back to
/// [`Heap::resize`]. Over-aligned allocations are always moved.
#[cfg_attr(feature = "doc_cfg", doc(cfg(unix)))]
pub struct GlobalHeap {
    inner: UnsafeCell<Option<TheHeap>>,
    capacity: usize,
    mutex: os::Mutex,
}

unsafe impl Send for GlobalHeap {}
unsafe impl Sync for GlobalHeap {}

impl GlobalHeap {
    /// Construct a `GlobalHeap` reserving [`DEFAULT_MMAP_CAPACITY`] bytes of
    /// address space on first use.
    #[inline]
    pub const fn new() -> Self {
        Self::with_capacity(DEFAULT_MMAP_CAPACITY)
    }

    /// Construct a `GlobalHeap` reserving `capacity` bytes of address space on
    /// first use.
    #[inline]
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: UnsafeCell::new(None),
            capacity,
            mutex: os::Mutex::new(),
        }
    }

    #[inline]
    fn lock_inner(&self) -> impl ops::DerefMut<Target = Option<TheHeap>> + '_ {
        struct LockGuard<'a>(&'a GlobalHeap);

        impl ops::Deref for LockGuard<'_> {
            type Target = Option<TheHeap>;

            #[inline]
            fn deref(&self) -> &Self::Target {
                // Safety: Protected by `mutex`
                unsafe { &*self.0.inner.get() }
            }
        }

        impl ops::DerefMut for LockGuard<'_> {
            #[inline]
            fn deref_mut(&mut self) -> &mut Self::Target {
                // Safety: Protected by `mutex`
                unsafe { &mut *self.0.inner.get() }
            }
        }

        impl Drop for LockGuard<'_> {
            #[inline]
            fn drop(&mut self) {
                self.0.mutex.unlock();
            }
        }

        self.mutex.lock();
        let mut guard = LockGuard(self);
        if guard.is_none() {
            *guard = MmapSource::reserve(self.capacity)
                .map(GlobalSource)
                .and_then(Heap::new);
        }
        guard
    }
}

impl Default for GlobalHeap {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate a block for `layout`, whose alignment is greater than
/// [`GRANULARITY`].
fn allocate_overaligned(
    heap: &mut TheHeap,
    layout: alloc::Layout,
    zeroed: bool,
) -> Option<NonNull<u8>> {
    let align = layout.align();
    let size = layout.size().checked_add(align)?;
    let base = if zeroed {
        heap.allocate_zeroed(size)?
    } else {
        heap.allocate(size)?
    };

    // `base` is aligned to `GRANULARITY`, so the padding is in
    // `GRANULARITY..=align` and leaves room for the back pointer
    let padding = align - (base.as_ptr() as usize & (align - 1));
    // Safety: `base + padding + layout.size()` is within the payload
    unsafe {
        let ptr = base.as_ptr().add(padding);
        ptr.cast::<NonNull<u8>>().sub(1).write(base);
        Some(NonNull::new_unchecked(ptr))
    }
}

/// Get the block address recorded by [`allocate_overaligned`].
///
/// # Safety
///
/// `ptr` must be a live allocation made by [`allocate_overaligned`].
#[inline]
unsafe fn overaligned_base(ptr: NonNull<u8>) -> NonNull<u8> {
    ptr.as_ptr().cast::<NonNull<u8>>().sub(1).read()
}

unsafe impl alloc::GlobalAlloc for GlobalHeap {
    #[inline]
    unsafe fn alloc(&self, layout: alloc::Layout) -> *mut u8 {
        let mut inner = self.lock_inner();
        inner
            .as_mut()
            .and_then(|heap| {
                if layout.align() > GRANULARITY {
                    allocate_overaligned(heap, layout, false)
                } else {
                    heap.allocate(layout.size())
                }
            })
            .map(NonNull::as_ptr)
            .unwrap_or(ptr::null_mut())
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: alloc::Layout) -> *mut u8 {
        let mut inner = self.lock_inner();
        inner
            .as_mut()
            .and_then(|heap| {
                if layout.align() > GRANULARITY {
                    allocate_overaligned(heap, layout, true)
                } else {
                    heap.allocate_zeroed(layout.size())
                }
            })
            .map(NonNull::as_ptr)
            .unwrap_or(ptr::null_mut())
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: alloc::Layout) {
        let mut inner = self.lock_inner();
        // Safety: All allocations are non-null
        let ptr = NonNull::new_unchecked(ptr);
        if let Some(heap) = inner.as_mut() {
            let ptr = if layout.align() > GRANULARITY {
                overaligned_base(ptr)
            } else {
                ptr
            };
            // Safety: `ptr` denotes a previous allocation
            heap.release(ptr);
        }
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: alloc::Layout, new_size: usize) -> *mut u8 {
        let mut inner = self.lock_inner();
        // Safety: All allocations are non-null
        let ptr = NonNull::new_unchecked(ptr);
        let heap = match inner.as_mut() {
            Some(heap) => heap,
            None => return ptr::null_mut(),
        };

        if layout.align() > GRANULARITY {
            // Safety: `new_size` doesn't overflow when rounded up to
            //         `layout.align()` (a precondition of `realloc`)
            let new_layout = alloc::Layout::from_size_align_unchecked(new_size, layout.align());
            let new_ptr = match allocate_overaligned(heap, new_layout, false) {
                Some(new_ptr) => new_ptr,
                None => return ptr::null_mut(),
            };
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), layout.size().min(new_size));
            heap.release(overaligned_base(ptr));
            return new_ptr.as_ptr();
        }

        // Safety: `ptr` denotes a previous allocation
        heap.resize_in_place(ptr, new_size)
            .or_else(|| heap.resize(ptr, new_size))
            .map(NonNull::as_ptr)
            .unwrap_or(ptr::null_mut())
    }
}
