//! The explicit free block list
use crate::codec::{Arena, Block, FreeBlock};

/// A circular doubly-linked list of free blocks anchored by a sentinel node.
///
/// The sentinel's links live in the payload of the prologue block, which is
/// permanently allocated and thus never coalesced or handed out. The list
/// nodes are the free blocks themselves: their links overlay the payload.
///
/// ```text
///    ,------------------------------------------------,
///    |  ,----------,      ,----------,      ,------,  |
///    '->| sentinel |<---->|   free   |<---->| free |<-'
///       '----------'      '----------'      '------'
/// ```
#[derive(Debug)]
pub(crate) struct FreeList {
    sentinel: Block,
}

impl FreeList {
    /// Initialize the sentinel's links to point to the sentinel itself.
    pub fn new(arena: &mut Arena, sentinel: Block) -> Self {
        let this = Self { sentinel };
        let node = this.sentinel();
        arena.set_prev_free(&node, &node);
        arena.set_next_free(&node, &node);
        this
    }

    #[inline]
    fn sentinel(&self) -> FreeBlock {
        FreeBlock::sentinel(self.sentinel)
    }

    /// Mark `block` as a free block of `size_words` words and insert it
    /// right after the sentinel.
    ///
    /// `block` must not be currently linked.
    pub fn link_free(&mut self, arena: &mut Arena, block: Block, size_words: usize) -> FreeBlock {
        let node = arena.write_free_block(block, size_words);

        let prev = self.sentinel();
        let next = arena.next_free(&prev);
        arena.set_prev_free(&node, &prev);
        arena.set_next_free(&node, &next);
        arena.set_next_free(&prev, &node);
        arena.set_prev_free(&next, &node);
        node
    }

    /// Remove `block` from the list by splicing its neighbors together.
    ///
    /// `block` must be currently linked. This is not checked.
    pub fn unlink(&mut self, arena: &mut Arena, block: &FreeBlock) {
        debug_assert_ne!(block.block(), self.sentinel);
        let prev = arena.prev_free(block);
        let next = arena.next_free(block);
        arena.set_next_free(&prev, &next);
        arena.set_prev_free(&next, &prev);
    }

    /// Remove `block` from the list and set its allocation bit. The size in
    /// its boundary tags is preserved.
    pub fn claim(&mut self, arena: &mut Arena, block: FreeBlock) -> Block {
        self.unlink(arena, &block);
        let block = block.block();
        arena.set_allocated(block, true);
        block
    }

    /// Iterate through the linked free blocks, most recently linked first.
    pub fn iter<'a>(&self, arena: &'a Arena) -> Iter<'a> {
        Iter {
            arena,
            sentinel: self.sentinel,
            cursor: arena.next_free(&self.sentinel()),
        }
    }
}

/// An iterator over the nodes of a [`FreeList`].
pub(crate) struct Iter<'a> {
    arena: &'a Arena,
    sentinel: Block,
    cursor: FreeBlock,
}

impl Iterator for Iter<'_> {
    type Item = Block;

    #[inline]
    fn next(&mut self) -> Option<Block> {
        let block = self.cursor.block();
        if block == self.sentinel {
            return None;
        }
        self.cursor = self.arena.next_free(&self.cursor);
        Some(block)
    }
}

#[cfg(test)]
mod tests;
