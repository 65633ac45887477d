//! Boundary tags and the offset arithmetic between blocks
use core::{mem, ptr::NonNull};

/// The size of a machine word (a header, a footer, or a free list link).
pub(crate) const WORD: usize = mem::size_of::<usize>();

/// The allocation granularity.
///
/// It is `size_of::<usize>() * 2` bytes. Every payload starts at
/// a `GRANULARITY`-byte boundary, and every block size is a multiple of it.
pub const GRANULARITY: usize = WORD * 2;

/// The bytes consumed by a block's header and footer.
pub const OVERHEAD: usize = WORD * 2;

/// The minimum size of a block in words: a header, two free list links, and
/// a footer.
pub(crate) const MIN_BLOCK_WORDS: usize = 4;

/// The minimum size of a block in bytes.
pub const MIN_BLOCK_SIZE: usize = MIN_BLOCK_WORDS * WORD;

/// The bit of a boundary tag indicating whether the block is allocated.
const TAG_ALLOCATED: usize = 1;

/// Pack a block size (in words) and an allocation bit into a boundary tag.
#[inline]
pub(crate) const fn encode(size_words: usize, allocated: bool) -> usize {
    debug_assert!(size_words % (GRANULARITY / WORD) == 0);
    (size_words << 1) | allocated as usize
}

/// Extract the block size (in words) from a boundary tag.
#[inline]
pub(crate) const fn decode_size(tag: usize) -> usize {
    tag >> 1
}

/// Extract the allocation bit from a boundary tag.
#[inline]
pub(crate) const fn decode_allocated(tag: usize) -> bool {
    (tag & TAG_ALLOCATED) != 0
}

/// A handle to a block: the byte offset of its payload from the heap base.
///
/// The header occupies the word immediately preceding the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Block(usize);

impl Block {
    #[inline]
    pub const fn from_offset(offset: usize) -> Self {
        debug_assert!(offset % GRANULARITY == 0);
        Self(offset)
    }

    #[inline]
    pub const fn offset(self) -> usize {
        self.0
    }

    /// The offset of the header word.
    #[inline]
    pub const fn header(self) -> usize {
        self.0 - WORD
    }
}

/// A block whose allocation bit is clear (or the free list sentinel). Only
/// this view exposes the free list links overlaid on the payload.
///
/// ```text
///  header   payload + 0   payload + WORD               footer
/// ,--------+-------------+---------------+-- ... --+--------,
/// | size|0 |  prev_free  |   next_free   |         | size|0 |
/// '--------+-------------+---------------+-- ... --+--------'
/// ```
///
/// It's intentionally not `Copy`: [`crate::free_list::FreeList::claim`]
/// consumes it when the block becomes allocated.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct FreeBlock(Block);

impl FreeBlock {
    /// Construct a view of the free list sentinel, which lives in the payload
    /// of the (allocated) prologue block.
    #[inline]
    pub const fn sentinel(prologue: Block) -> Self {
        Self(prologue)
    }

    #[inline]
    pub const fn block(&self) -> Block {
        self.0
    }
}

/// The memory window of a heap: `len` committed bytes starting at `base`.
///
/// All raw memory accesses of the allocator core go through this type. Every
/// [`Block`] handed to its accessors is derived from intact boundary tags or
/// from a range freshly committed by the memory source, so the computed
/// offsets stay within `0..len`. This is checked by debug assertions only.
#[derive(Debug)]
pub(crate) struct Arena {
    base: NonNull<u8>,
    len: usize,
}

impl Arena {
    /// # Safety
    ///
    /// `base..base + len` must be valid for reads and writes, exclusively
    /// owned by the returned `Arena`, and aligned to [`GRANULARITY`].
    #[inline]
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        debug_assert_eq!(base.as_ptr() as usize % GRANULARITY, 0);
        Self { base, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// The one-past-end address of the committed memory.
    #[inline]
    pub fn end(&self) -> *mut u8 {
        self.base.as_ptr().wrapping_add(self.len)
    }

    /// Take `additional` bytes, which were just committed right after
    /// [`Self::end`], into the window.
    ///
    /// # Safety
    ///
    /// Same as [`Self::new`], for the range `end..end + additional`.
    #[inline]
    pub unsafe fn grow(&mut self, additional: usize) {
        self.len += additional;
    }

    #[inline]
    fn word(&self, offset: usize) -> usize {
        debug_assert_eq!(offset % WORD, 0);
        debug_assert!(offset + WORD <= self.len, "{} is out of bounds", offset);
        // Safety: `offset` is within the window, which is valid for reads and
        //         aligned to `WORD`
        unsafe { self.base.as_ptr().add(offset).cast::<usize>().read() }
    }

    #[inline]
    fn set_word(&mut self, offset: usize, value: usize) {
        debug_assert_eq!(offset % WORD, 0);
        debug_assert!(offset + WORD <= self.len, "{} is out of bounds", offset);
        // Safety: `offset` is within the window, which is valid for writes and
        //         aligned to `WORD`
        unsafe { self.base.as_ptr().add(offset).cast::<usize>().write(value) }
    }

    /// Clear the word at `offset`.
    #[inline]
    pub fn clear_word(&mut self, offset: usize) {
        self.set_word(offset, 0);
    }

    /// The raw boundary tag stored in `block`'s header.
    #[inline]
    pub fn header_tag(&self, block: Block) -> usize {
        self.word(block.header())
    }

    /// The raw boundary tag stored in `block`'s footer.
    #[inline]
    pub fn footer_tag(&self, block: Block) -> usize {
        self.word(self.footer(block))
    }

    /// The offset of the footer word, located using the size recorded in the
    /// header.
    #[inline]
    pub fn footer(&self, block: Block) -> usize {
        block.offset() + self.size(block) - GRANULARITY
    }

    #[inline]
    pub fn size_words(&self, block: Block) -> usize {
        decode_size(self.header_tag(block))
    }

    /// The size of the whole block in bytes, including the boundary tags.
    #[inline]
    pub fn size(&self, block: Block) -> usize {
        self.size_words(block) * WORD
    }

    #[inline]
    pub fn is_allocated(&self, block: Block) -> bool {
        decode_allocated(self.header_tag(block))
    }

    /// Get the physically next block using `block`'s header.
    #[inline]
    pub fn next_block(&self, block: Block) -> Block {
        Block(block.offset() + self.size(block))
    }

    /// Get the physically previous block using its footer, which immediately
    /// precedes `block`'s header.
    #[inline]
    pub fn prev_block(&self, block: Block) -> Block {
        let prev_footer = self.word(block.offset() - GRANULARITY);
        Block(block.offset() - decode_size(prev_footer) * WORD)
    }

    /// Write matching boundary tags at both ends of `block`.
    #[inline]
    pub fn write_block(&mut self, block: Block, size_words: usize, allocated: bool) {
        debug_assert!(size_words >= MIN_BLOCK_WORDS);
        let tag = encode(size_words, allocated);
        self.set_word(block.header(), tag);
        self.set_word(block.offset() + size_words * WORD - GRANULARITY, tag);
    }

    /// Write boundary tags marking `block` as a free block of `size_words`
    /// words and get its free-block view.
    #[inline]
    pub fn write_free_block(&mut self, block: Block, size_words: usize) -> FreeBlock {
        self.write_block(block, size_words, false);
        FreeBlock(block)
    }

    /// Write a zero-sized allocated header marking the end of the heap.
    #[inline]
    pub fn write_epilogue(&mut self, block: Block) {
        debug_assert_eq!(block.offset(), self.len);
        self.set_word(block.header(), encode(0, true));
    }

    /// Set or clear the allocation bit in both boundary tags, leaving the
    /// size untouched.
    #[inline]
    pub fn set_allocated(&mut self, block: Block, allocated: bool) {
        let tag = (self.header_tag(block) & !TAG_ALLOCATED) | allocated as usize;
        let footer = self.footer(block);
        self.set_word(block.header(), tag);
        self.set_word(footer, tag);
    }

    /// Get the free-block view of `block` if its allocation bit is clear.
    #[inline]
    pub fn as_free(&self, block: Block) -> Option<FreeBlock> {
        if self.is_allocated(block) {
            None
        } else {
            Some(FreeBlock(block))
        }
    }

    #[inline]
    pub fn prev_free(&self, block: &FreeBlock) -> FreeBlock {
        FreeBlock(Block(self.word(block.0.offset())))
    }

    #[inline]
    pub fn next_free(&self, block: &FreeBlock) -> FreeBlock {
        FreeBlock(Block(self.word(block.0.offset() + WORD)))
    }

    #[inline]
    pub fn set_prev_free(&mut self, block: &FreeBlock, prev: &FreeBlock) {
        self.set_word(block.0.offset(), prev.0.offset());
    }

    #[inline]
    pub fn set_next_free(&mut self, block: &FreeBlock, next: &FreeBlock) {
        self.set_word(block.0.offset() + WORD, next.0.offset());
    }

    /// Get the payload address of `block`.
    #[inline]
    pub fn payload(&self, block: Block) -> NonNull<u8> {
        debug_assert!(block.offset() <= self.len);
        // Safety: `base` is non-null and the offset stays within the window
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(block.offset())) }
    }

    /// Get the block whose payload starts at `ptr`.
    #[inline]
    pub fn block_of(&self, ptr: NonNull<u8>) -> Block {
        let offset = (ptr.as_ptr() as usize).wrapping_sub(self.base.as_ptr() as usize);
        debug_assert!(offset < self.len, "{:p} does not belong to this heap", ptr);
        Block::from_offset(offset)
    }

    /// Copy `len` payload bytes from `src` to `dst`.
    #[inline]
    pub fn copy_payload(&mut self, src: Block, dst: Block, len: usize) {
        debug_assert_ne!(src, dst);
        debug_assert!(len <= self.size(src) - OVERHEAD);
        debug_assert!(len <= self.size(dst) - OVERHEAD);
        // Safety: Both payloads are within the window and belong to distinct
        //         blocks, so they don't overlap
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.payload(src).as_ptr(),
                self.payload(dst).as_ptr(),
                len,
            )
        };
    }

    /// Fill the first `len` payload bytes of `block` with zeros.
    #[inline]
    pub fn zero_payload(&mut self, block: Block, len: usize) {
        debug_assert!(len <= self.size(block) - OVERHEAD);
        // Safety: The payload is within the window
        unsafe { self.payload(block).as_ptr().write_bytes(0, len) };
    }
}

#[cfg(test)]
mod tests;
