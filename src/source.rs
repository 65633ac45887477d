//! Memory sources backing a [`Heap`](crate::Heap)
use core::{marker::PhantomData, mem::MaybeUninit, ptr::NonNull};

use crate::{utils::nonnull_slice_len, GRANULARITY};

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod mmap;
        pub use self::mmap::*;
    }
}

/// The interface through which [`Heap`](crate::Heap) obtains more memory,
/// analogous to `sbrk`.
///
/// # Safety
///
///  - A range returned by [`Self::grow`] must be valid for reads and writes,
///    and must not be accessed by anyone but the caller until `self` is
///    dropped.
///  - Successive successful calls must return adjacent ranges: each returned
///    pointer must equal the one-past-end pointer of the range returned by the
///    previous call.
///  - The first returned range should start at a [`GRANULARITY`]-byte
///    boundary. `Heap` refuses to initialize otherwise.
///
pub unsafe trait HeapSource {
    /// Whether a [`Heap`](crate::Heap) built on this source emits log
    /// records.
    ///
    /// A source backing a global allocator should set this to `false`: a
    /// logger that allocates would re-enter the allocator while it's locked.
    const LOGGING: bool = true;

    /// Commit `len` more bytes at the end of the memory obtained so far.
    ///
    /// Returns the starting address of the new bytes on success; `None` if
    /// the source is exhausted.
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>>;
}

unsafe impl<T: ?Sized + HeapSource> HeapSource for &mut T {
    const LOGGING: bool = T::LOGGING;

    #[inline]
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
        (**self).grow(len)
    }
}

/// A [`HeapSource`] carving growth out of a caller-provided memory pool.
///
/// # Examples
///
/// ```
/// use tagalloc::{HeapSource, SliceSource};
/// use std::mem::MaybeUninit;
/// let mut pool = [MaybeUninit::uninit(); 1024];
/// let mut source = SliceSource::new(&mut pool);
/// let first = source.grow(64).unwrap();
/// let second = source.grow(64).unwrap();
/// assert_eq!(second.as_ptr(), first.as_ptr().wrapping_add(64));
/// assert!(source.grow(1024).is_none());
/// ```
///
/// The pool must outlive the source:
///
/// ```rust,compile_fail
/// use tagalloc::SliceSource;
/// use std::mem::MaybeUninit;
/// let source = {
///     let mut pool = [MaybeUninit::uninit(); 1024];
///     SliceSource::new(&mut pool)
/// };
/// drop(source);
/// ```
#[derive(Debug)]
pub struct SliceSource<'pool> {
    start: NonNull<u8>,
    capacity: usize,
    brk: usize,
    _phantom: PhantomData<&'pool mut [MaybeUninit<u8>]>,
}

// Safety: `SliceSource` logically owns the pool, which is `Send`.
unsafe impl Send for SliceSource<'_> {}

impl<'pool> SliceSource<'pool> {
    /// Construct a `SliceSource` handing out `pool`'s bytes from the first
    /// [`GRANULARITY`]-byte boundary.
    pub fn new(pool: &'pool mut [MaybeUninit<u8>]) -> Self {
        let len = pool.len();
        // Safety: `pool` is a mutable reference, which guarantees the absence
        // of aliasing references. Being `'pool` means it will outlive `self`.
        unsafe { Self::from_raw(NonNull::from(pool).cast(), len) }
    }

    /// Construct a `SliceSource` from a slice pointer.
    ///
    /// # Safety
    ///
    /// The memory block will be considered owned by `self`. The memory block
    /// must outlive `self`.
    pub unsafe fn from_ptr(pool: NonNull<[MaybeUninit<u8>]>) -> Self {
        Self::from_raw(pool.cast(), nonnull_slice_len(pool))
    }

    unsafe fn from_raw(start: NonNull<u8>, len: usize) -> Self {
        // Round up the starting address
        let unaligned_start = start.as_ptr() as usize;
        let padding = unaligned_start.wrapping_neg() & (GRANULARITY - 1);

        Self {
            // Safety: `start + padding.min(len)` is within or one past the end
            //         of the pool, so it's non-null
            start: NonNull::new_unchecked(start.as_ptr().wrapping_add(padding.min(len))),
            capacity: len.saturating_sub(padding),
            brk: 0,
            _phantom: PhantomData,
        }
    }

    /// The number of bytes handed out so far.
    #[inline]
    pub fn used(&self) -> usize {
        self.brk
    }

    /// The number of bytes that can still be handed out.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.brk
    }
}

unsafe impl HeapSource for SliceSource<'_> {
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
        if len > self.remaining() {
            return None;
        }
        let ptr = self.start.as_ptr().wrapping_add(self.brk);
        self.brk += len;
        NonNull::new(ptr)
    }
}
