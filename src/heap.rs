//! The allocator core
use core::{fmt, ptr::NonNull};

use crate::{
    codec::{Arena, Block, FreeBlock, GRANULARITY, MIN_BLOCK_WORDS, OVERHEAD, WORD},
    free_list::{self, FreeList},
    utils::checked_align_up,
    HeapSource,
};

mod check;
pub use self::check::Corruption;

/// The default number of words requested from the memory source whenever the
/// heap runs out of free blocks.
pub const DEFAULT_CHUNK_WORDS: usize = 1 << 10;

/// The prologue block. Its payload hosts the free list sentinel.
const PROLOGUE: Block = Block::from_offset(GRANULARITY);

/// The first block after the prologue, where physical scans start.
const FIRST_BLOCK: Block = Block::from_offset(PROLOGUE.offset() + MIN_BLOCK_WORDS * WORD);

/// The bytes reserved on initialization: a padding word, the prologue, and
/// the epilogue header.
const PROLOGUE_LEN: usize = FIRST_BLOCK.offset();

#[doc = svgbobdoc::transform!(
/// A boundary-tag allocator managing one contiguous, growable heap obtained
/// from a [`HeapSource`].
///
/// # Heap Layout
///
/// <center>
/// ```svgbob
///        prologue                  allocated                free            epilogue
///  ,---+----+----+----+----,  ,----+---------+----,  ,----+----+----+--+----,  ,----,
///  |pad|4|1 |prev|next|4|1 |  |n|1 | payload |n|1 |  |m|0 |prev|next|  |m|0 |  |0|1 |
///  '---+----+-+--+--+-+----'  '----+---------+----'  '----+-+--+--+-+--+----'  '----'
///             |     |                                       |     |
///             '-----+------------ free list ----------------'-----'
/// ```
/// </center>
///
/// Each block is delimited by two identical boundary tags (header and
/// footer) containing `(size_in_words << 1) | allocated`. A free block also
/// stores the links of the doubly-linked free list in its payload area. The
/// prologue and the epilogue are permanently allocated, so scanning and
/// coalescing never run past either end of the heap.
///
/// # Properties
///
///  - Every payload is aligned to [`GRANULARITY`] bytes. Greater alignments
///    are not supported.
///  - Allocation uses a first-fit search over the blocks in address order,
///    splitting the found block when the remainder can hold a block of
///    [`MIN_BLOCK_SIZE`](crate::MIN_BLOCK_SIZE) bytes.
///  - Deallocation immediately coalesces the block with its free neighbors.
///  - The heap grows by at least `CHUNK_WORDS` words at a time and never
///    shrinks.
///
/// This type is not thread-safe by itself. See [`GlobalHeap`] for a locked
/// global allocator.
///
/// [`GlobalHeap`]: crate::GlobalHeap
)]
#[derive(Debug)]
pub struct Heap<S, const CHUNK_WORDS: usize = DEFAULT_CHUNK_WORDS> {
    source: S,
    arena: Arena,
    free: FreeList,
}

// Safety: All memory directly or indirectly referenced by a particular
//         instance of `Heap` is logically owned by that `Heap`.
unsafe impl<S: Send, const CHUNK_WORDS: usize> Send for Heap<S, CHUNK_WORDS> {}

/// Information about a block, as yielded by [`Heap::blocks`] and
/// [`Heap::free_blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// The starting address of the payload.
    pub ptr: NonNull<u8>,
    /// The size of the whole block, including the boundary tags.
    pub size: usize,
    /// Whether the block is allocated.
    pub allocated: bool,
}

impl BlockInfo {
    /// The number of bytes available to the payload.
    #[inline]
    pub fn usable_size(&self) -> usize {
        self.size - OVERHEAD
    }
}

impl<S: HeapSource, const CHUNK_WORDS: usize> Heap<S, CHUNK_WORDS> {
    /// Evaluates successfully if the parameters are valid.
    const VALID: () = assert!(
        CHUNK_WORDS >= MIN_BLOCK_WORDS && CHUNK_WORDS % (GRANULARITY / WORD) == 0,
        "`CHUNK_WORDS` must be an even number not less than four"
    );

    /// Initialize a heap on top of `source`.
    ///
    /// This reserves the prologue and the epilogue and then extends the heap
    /// by `CHUNK_WORDS` words. Returns `None` if `source` can't supply the
    /// memory or its first range is not aligned to [`GRANULARITY`].
    ///
    /// # Examples
    ///
    /// ```
    /// use tagalloc::{Heap, SliceSource};
    /// use std::mem::MaybeUninit;
    /// let mut pool = [MaybeUninit::uninit(); 4096];
    /// let heap: Heap<_, 64> = Heap::new(SliceSource::new(&mut pool)).unwrap();
    /// assert_eq!(heap.free_blocks().count(), 1);
    /// ```
    pub fn new(mut source: S) -> Option<Self> {
        let () = Self::VALID;

        let base = source.grow(PROLOGUE_LEN)?;
        if base.as_ptr() as usize % GRANULARITY != 0 {
            if S::LOGGING {
                log::warn!("the memory source returned a misaligned range {:p}", base);
            }
            return None;
        }

        // Safety: `source` upholds `HeapSource`'s requirements, and we just
        //         checked the alignment
        let mut arena = unsafe { Arena::new(base, PROLOGUE_LEN) };
        arena.clear_word(0);
        arena.write_block(PROLOGUE, MIN_BLOCK_WORDS, true);
        let free = FreeList::new(&mut arena, PROLOGUE);
        arena.write_epilogue(FIRST_BLOCK);

        let mut this = Self {
            source,
            arena,
            free,
        };
        if S::LOGGING {
            log::debug!("heap initialized at {:p}", base);
        }

        this.extend_heap(CHUNK_WORDS)?;
        Some(this)
    }

    /// Get a reference to the underlying memory source.
    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Get a mutable reference to the underlying memory source.
    ///
    /// # Safety
    ///
    /// The caller must not replace the source or otherwise break the
    /// requirements of [`HeapSource`] for the memory already obtained.
    #[inline]
    pub unsafe fn source_mut_unchecked(&mut self) -> &mut S {
        &mut self.source
    }

    /// The number of bytes obtained from the memory source so far.
    #[inline]
    pub fn heap_size(&self) -> usize {
        self.arena.len()
    }

    /// Calculate the size (in words) of a block that can hold a payload of
    /// `size` bytes.
    #[inline]
    fn adjust_size(size: usize) -> Option<usize> {
        Some(checked_align_up(size.checked_add(OVERHEAD)?, GRANULARITY)? / WORD)
    }

    /// Attempt to allocate a block of memory.
    ///
    /// Returns the starting address of the payload on success; `None` if
    /// `size` is zero or the memory source is exhausted.
    ///
    /// The payload is aligned to [`GRANULARITY`] bytes and is at least `size`
    /// bytes long.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }

        let size_words = Self::adjust_size(size)?;

        let block = match self.find_fit(size_words) {
            Some(block) => block,
            None => self.extend_heap(size_words.max(CHUNK_WORDS))?,
        };
        let block = self.place(block, size_words);

        let ptr = self.arena.payload(block);
        if S::LOGGING {
            log::trace!("allocate({}) = {:p}", size, ptr);
        }
        Some(ptr)
    }

    /// Similar to [`Self::allocate`] but the first `size` bytes of the
    /// payload are filled with zeros.
    pub fn allocate_zeroed(&mut self, size: usize) -> Option<NonNull<u8>> {
        let ptr = self.allocate(size)?;
        let block = self.arena.block_of(ptr);
        self.arena.zero_payload(block, size);
        Some(ptr)
    }

    /// Find the first free block, in address order, consisting of at least
    /// `size_words` words.
    fn find_fit(&self, size_words: usize) -> Option<FreeBlock> {
        let mut block = FIRST_BLOCK;
        loop {
            let block_words = self.arena.size_words(block);
            if block_words == 0 {
                // Reached the epilogue
                return None;
            }

            if block_words >= size_words {
                if let Some(free) = self.arena.as_free(block) {
                    return Some(free);
                }
            }

            block = self.arena.next_block(block);
        }
    }

    /// Turn `block` into an allocated block of `size_words` words, splitting
    /// off the remainder as a new free block if it's large enough to be one.
    fn place(&mut self, block: FreeBlock, size_words: usize) -> Block {
        let block_words = self.arena.size_words(block.block());
        debug_assert!(block_words >= size_words);

        let block = self.free.claim(&mut self.arena, block);

        let remainder = block_words - size_words;
        if remainder >= MIN_BLOCK_WORDS {
            self.arena.write_block(block, size_words, true);
            let rest = self.arena.next_block(block);
            self.free.link_free(&mut self.arena, rest, remainder);
        }

        block
    }

    /// Deallocate a previously allocated memory block.
    ///
    /// # Safety
    ///
    ///  - `ptr` must denote a memory block previously allocated via `self`.
    ///  - The memory block must not have been deallocated since.
    ///
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) {
        let block = self.arena.block_of(ptr);
        debug_assert!(self.arena.is_allocated(block), "{:p} is not allocated", ptr);
        if S::LOGGING {
            log::trace!("release({:p})", ptr);
        }

        let size_words = self.arena.size_words(block);
        let node = self.free.link_free(&mut self.arena, block, size_words);
        self.coalesce(node);
    }

    /// Merge the linked free block `node` with its free physical neighbors.
    ///
    /// Returns the resulting free block, which starts at the lowest address of
    /// the merged group.
    fn coalesce(&mut self, node: FreeBlock) -> FreeBlock {
        let block = node.block();
        let original_words = self.arena.size_words(block);

        let mut start = block;
        let mut size_words = original_words;

        let prev = self.arena.prev_block(block);
        if let Some(prev) = self.arena.as_free(prev) {
            size_words += self.arena.size_words(prev.block());
            start = prev.block();
            self.free.unlink(&mut self.arena, &prev);
        }

        let next = self.arena.next_block(block);
        if let Some(next) = self.arena.as_free(next) {
            size_words += self.arena.size_words(next.block());
            self.free.unlink(&mut self.arena, &next);
        }

        if size_words == original_words {
            return node;
        }

        self.free.unlink(&mut self.arena, &node);
        self.free.link_free(&mut self.arena, start, size_words)
    }

    /// Move a previously allocated memory block to a new block of
    /// `new_size` bytes.
    ///
    /// The first `min(new_size, usable_size)` bytes are copied. The old block
    /// is deallocated on success and left intact on failure. This method
    /// always moves the allocation; see [`Self::resize_in_place`] for
    /// resizing without moving.
    ///
    /// Returns the new starting address on success; `None` if `new_size` is
    /// zero or the memory source is exhausted.
    ///
    /// # Safety
    ///
    ///  - `ptr` must denote a memory block previously allocated via `self`.
    ///  - The memory block must not have been deallocated since.
    ///
    pub unsafe fn resize(&mut self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        let old_block = self.arena.block_of(ptr);
        debug_assert!(self.arena.is_allocated(old_block), "{:p} is not allocated", ptr);

        let new_ptr = self.allocate(new_size)?;
        let new_block = self.arena.block_of(new_ptr);

        let len = new_size.min(self.arena.size(old_block) - OVERHEAD);
        self.arena.copy_payload(old_block, new_block, len);

        self.release(ptr);

        if S::LOGGING {
            log::trace!("resize({:p}, {}) = {:p}", ptr, new_size, new_ptr);
        }
        Some(new_ptr)
    }

    /// Shrink or grow a previously allocated memory block without moving it.
    ///
    /// Shrinking splits off the excess as a free block. Growing takes space
    /// from the physically next block if it's free and large enough.
    ///
    /// Returns `ptr` on success; `None` if `new_size` is zero or the block
    /// can't be resized in place, in which case nothing is changed.
    ///
    /// # Safety
    ///
    ///  - `ptr` must denote a memory block previously allocated via `self`.
    ///  - The memory block must not have been deallocated since.
    ///
    pub unsafe fn resize_in_place(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        if new_size == 0 {
            return None;
        }

        let block = self.arena.block_of(ptr);
        debug_assert!(self.arena.is_allocated(block), "{:p} is not allocated", ptr);

        let size_words = Self::adjust_size(new_size)?;
        let old_words = self.arena.size_words(block);

        if size_words <= old_words {
            let remainder = old_words - size_words;
            if remainder >= MIN_BLOCK_WORDS {
                self.arena.write_block(block, size_words, true);
                let rest = self.arena.next_block(block);
                let rest = self.free.link_free(&mut self.arena, rest, remainder);
                self.coalesce(rest);
            }
        } else {
            // Grow into the next free block. Fail if there isn't such a block.
            let next = self.arena.next_block(block);
            let next = self.arena.as_free(next)?;
            let available = old_words + self.arena.size_words(next.block());
            if available < size_words {
                return None;
            }

            self.free.unlink(&mut self.arena, &next);

            let remainder = available - size_words;
            if remainder >= MIN_BLOCK_WORDS {
                self.arena.write_block(block, size_words, true);
                let rest = self.arena.next_block(block);
                self.free.link_free(&mut self.arena, rest, remainder);
            } else {
                self.arena.write_block(block, available, true);
            }
        }

        if S::LOGGING {
            log::trace!("resize_in_place({:p}, {})", ptr, new_size);
        }
        Some(ptr)
    }

    /// Get the number of bytes available to the payload of a previously
    /// allocated memory block. This is at least the requested size.
    ///
    /// # Safety
    ///
    ///  - `ptr` must denote a memory block previously allocated via `self`.
    ///  - The memory block must not have been deallocated since.
    ///
    #[inline]
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        self.arena.size(self.arena.block_of(ptr)) - OVERHEAD
    }

    /// Obtain `words` (rounded up to an even number) more words from the
    /// memory source and turn them into a free block at the end of the heap.
    ///
    /// Returns the new free block after coalescing it with the block
    /// preceding it; `None` if the memory source is exhausted, in which case
    /// the heap is left untouched.
    fn extend_heap(&mut self, words: usize) -> Option<FreeBlock> {
        let words = checked_align_up(words, GRANULARITY / WORD)?;
        let len = words.checked_mul(WORD)?;

        let start = self.source.grow(len)?;
        if start.as_ptr() != self.arena.end() {
            if S::LOGGING {
                log::warn!(
                    "the memory source returned a non-contiguous range {:p} (expected {:p})",
                    start,
                    self.arena.end()
                );
            }
            return None;
        }

        // The new block's header replaces the old epilogue.
        let block = Block::from_offset(self.arena.len());

        // Safety: `source` upholds `HeapSource`'s requirements, and we just
        //         checked the contiguity
        unsafe { self.arena.grow(len) };

        let node = self.free.link_free(&mut self.arena, block, words);
        self.arena.write_epilogue(self.arena.next_block(block));

        if S::LOGGING {
            log::debug!(
                "extended the heap by {} bytes (now {} bytes)",
                len,
                self.arena.len()
            );
        }

        Some(self.coalesce(node))
    }

    /// Iterate through all blocks between the prologue and the epilogue in
    /// address order.
    #[inline]
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            arena: &self.arena,
            cursor: FIRST_BLOCK,
        }
    }

    /// Iterate through the free list, most recently linked block first.
    #[inline]
    pub fn free_blocks(&self) -> FreeBlocks<'_> {
        FreeBlocks {
            arena: &self.arena,
            inner: self.free.iter(&self.arena),
        }
    }
}

/// An iterator over the blocks of a [`Heap`] in address order, created by
/// [`Heap::blocks`].
pub struct Blocks<'a> {
    arena: &'a Arena,
    cursor: Block,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let block = self.cursor;
        let size = self.arena.size(block);
        if size == 0 {
            return None;
        }
        self.cursor = self.arena.next_block(block);
        Some(BlockInfo {
            ptr: self.arena.payload(block),
            size,
            allocated: self.arena.is_allocated(block),
        })
    }
}

impl fmt::Debug for Blocks<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blocks")
            .field("cursor", &self.cursor)
            .finish()
    }
}

/// An iterator over the free blocks of a [`Heap`], created by
/// [`Heap::free_blocks`].
pub struct FreeBlocks<'a> {
    arena: &'a Arena,
    inner: free_list::Iter<'a>,
}

impl Iterator for FreeBlocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let block = self.inner.next()?;
        Some(BlockInfo {
            ptr: self.arena.payload(block),
            size: self.arena.size(block),
            allocated: false,
        })
    }
}

impl fmt::Debug for FreeBlocks<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeBlocks").finish_non_exhaustive()
    }
}
