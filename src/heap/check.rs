//! Heap consistency checker
use core::fmt;

use super::{Heap, FIRST_BLOCK, PROLOGUE};
use crate::{
    codec::{encode, Block, FreeBlock, GRANULARITY, MIN_BLOCK_WORDS, WORD},
    HeapSource,
};

/// A violated heap invariant, as reported by [`Heap::check`].
///
/// Offsets are measured in bytes from the start of the heap and denote
/// a block's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Corruption {
    /// The prologue block's boundary tags were overwritten.
    Prologue,
    /// The heap doesn't end with an epilogue header, or a zero-sized block
    /// was found before the end.
    Epilogue { offset: usize },
    /// A block's size is not a multiple of the granularity or is smaller than
    /// the minimum block size.
    BadSize { offset: usize },
    /// A block extends past the end of the heap.
    OutOfBounds { offset: usize },
    /// A block's header and footer differ.
    TagMismatch { offset: usize },
    /// Two physically adjacent blocks are both free.
    Uncoalesced { offset: usize },
    /// A free list link points outside the heap, to something other than a
    /// block, or disagrees with the reverse link.
    FreeListLink { offset: usize },
    /// An allocated block is linked to the free list.
    AllocatedInFreeList { offset: usize },
    /// The number of free blocks in the heap and in the free list differ.
    FreeListMismatch { in_heap: usize, in_list: usize },
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Prologue => write!(f, "the prologue block is corrupted"),
            Self::Epilogue { offset } => write!(f, "unexpected epilogue state at {:#x}", offset),
            Self::BadSize { offset } => write!(f, "block {:#x} has an invalid size", offset),
            Self::OutOfBounds { offset } => {
                write!(f, "block {:#x} extends past the end of the heap", offset)
            }
            Self::TagMismatch { offset } => {
                write!(f, "block {:#x} has mismatching header and footer", offset)
            }
            Self::Uncoalesced { offset } => {
                write!(f, "free block {:#x} follows another free block", offset)
            }
            Self::FreeListLink { offset } => {
                write!(f, "free list node {:#x} has an invalid link", offset)
            }
            Self::AllocatedInFreeList { offset } => {
                write!(f, "allocated block {:#x} is in the free list", offset)
            }
            Self::FreeListMismatch { in_heap, in_list } => write!(
                f,
                "{} free blocks in the heap but {} in the free list",
                in_heap, in_list
            ),
        }
    }
}

#[cfg(feature = "std")]
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "std")))]
impl std::error::Error for Corruption {}

impl<S: HeapSource, const CHUNK_WORDS: usize> Heap<S, CHUNK_WORDS> {
    /// Verify the heap's structural invariants.
    ///
    /// # Time Complexity
    ///
    /// This method takes `O(n * m)` time, where `n` is the number of blocks
    /// and `m` is the number of free blocks.
    pub fn check(&self) -> Result<(), Corruption> {
        let arena = &self.arena;
        let prologue_tag = encode(MIN_BLOCK_WORDS, true);
        if arena.header_tag(PROLOGUE) != prologue_tag || arena.footer_tag(PROLOGUE) != prologue_tag
        {
            return Err(Corruption::Prologue);
        }

        // Walk the blocks in address order
        let mut num_free = 0;
        let mut prev_free = false;
        let mut block = FIRST_BLOCK;
        loop {
            let offset = block.offset();
            let size_words = arena.size_words(block);

            if size_words == 0 {
                if offset != arena.len() || arena.header_tag(block) != encode(0, true) {
                    return Err(Corruption::Epilogue { offset });
                }
                break;
            }

            if size_words % (GRANULARITY / WORD) != 0 || size_words < MIN_BLOCK_WORDS {
                return Err(Corruption::BadSize { offset });
            }

            // The block must leave room for at least the epilogue header
            match size_words.checked_mul(WORD).and_then(|x| x.checked_add(offset)) {
                Some(end) if end <= arena.len() => {}
                _ => return Err(Corruption::OutOfBounds { offset }),
            }

            if arena.header_tag(block) != arena.footer_tag(block) {
                return Err(Corruption::TagMismatch { offset });
            }

            let free = !arena.is_allocated(block);
            if free {
                if prev_free {
                    return Err(Corruption::Uncoalesced { offset });
                }
                num_free += 1;
            }
            prev_free = free;

            block = arena.next_block(block);
        }

        // Walk the free list
        let mut num_linked = 0;
        let mut prev = FreeBlock::sentinel(PROLOGUE);
        let mut cursor = arena.next_free(&prev);
        while cursor.block() != PROLOGUE {
            let offset = cursor.block().offset();
            if !self.is_block_start(offset) {
                return Err(Corruption::FreeListLink {
                    offset: prev.block().offset(),
                });
            }
            if arena.is_allocated(cursor.block()) {
                return Err(Corruption::AllocatedInFreeList { offset });
            }
            if arena.prev_free(&cursor) != prev {
                return Err(Corruption::FreeListLink { offset });
            }

            num_linked += 1;
            if num_linked > num_free {
                // Also catches a cycle not involving the sentinel
                return Err(Corruption::FreeListMismatch {
                    in_heap: num_free,
                    in_list: num_linked,
                });
            }

            prev = cursor;
            cursor = arena.next_free(&prev);
        }

        if arena.prev_free(&cursor) != prev {
            return Err(Corruption::FreeListLink {
                offset: PROLOGUE.offset(),
            });
        }

        if num_linked != num_free {
            return Err(Corruption::FreeListMismatch {
                in_heap: num_free,
                in_list: num_linked,
            });
        }

        Ok(())
    }

    /// Determine whether a block's payload starts at `offset`. Assumes that
    /// the physical block chain is intact.
    fn is_block_start(&self, offset: usize) -> bool {
        if offset % GRANULARITY != 0 || offset < FIRST_BLOCK.offset() || offset >= self.arena.len()
        {
            return false;
        }

        let mut block = FIRST_BLOCK;
        while block.offset() < offset {
            block = self.arena.next_block(block);
        }
        block == Block::from_offset(offset)
    }
}
