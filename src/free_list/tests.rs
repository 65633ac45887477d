use std::{prelude::v1::*, ptr::NonNull};

use super::*;
use crate::codec::{GRANULARITY, MIN_BLOCK_WORDS, WORD};

#[repr(align(64))]
struct Align<T>(T);

const SENTINEL: Block = Block::from_offset(GRANULARITY);

/// The `i`-th minimum-sized block following the sentinel block.
fn nth_block(i: usize) -> Block {
    Block::from_offset(SENTINEL.offset() + (i + 1) * MIN_BLOCK_WORDS * WORD)
}

fn with_list(f: impl FnOnce(&mut Arena, &mut FreeList)) {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut pool = Align([0usize; 64]);
    let base = NonNull::from(&mut pool.0).cast::<u8>();
    // Safety: `pool` outlives `arena` and is aligned to 64 bytes
    let mut arena = unsafe { Arena::new(base, 64 * WORD) };
    arena.write_block(SENTINEL, MIN_BLOCK_WORDS, true);
    let mut list = FreeList::new(&mut arena, SENTINEL);
    f(&mut arena, &mut list);
}

#[test]
fn empty() {
    with_list(|arena, list| {
        assert_eq!(list.iter(arena).count(), 0);
        let sentinel = FreeBlock::sentinel(SENTINEL);
        assert_eq!(arena.next_free(&sentinel).block(), SENTINEL);
        assert_eq!(arena.prev_free(&sentinel).block(), SENTINEL);
    });
}

#[test]
fn lifo_order() {
    with_list(|arena, list| {
        for i in 0..3 {
            list.link_free(arena, nth_block(i), MIN_BLOCK_WORDS);
        }
        let order: Vec<_> = list.iter(arena).collect();
        assert_eq!(order, [nth_block(2), nth_block(1), nth_block(0)]);

        for i in 0..3 {
            let block = nth_block(i);
            assert!(!arena.is_allocated(block));
            assert_eq!(arena.size_words(block), MIN_BLOCK_WORDS);
        }
    });
}

#[test]
fn unlink_middle() {
    with_list(|arena, list| {
        let nodes: Vec<_> = (0..3)
            .map(|i| list.link_free(arena, nth_block(i), MIN_BLOCK_WORDS))
            .collect();

        list.unlink(arena, &nodes[1]);
        let order: Vec<_> = list.iter(arena).collect();
        assert_eq!(order, [nth_block(2), nth_block(0)]);

        assert_eq!(arena.next_free(&nodes[2]).block(), nth_block(0));
        assert_eq!(arena.prev_free(&nodes[0]).block(), nth_block(2));
    });
}

#[test]
fn unlink_all() {
    with_list(|arena, list| {
        let nodes: Vec<_> = (0..3)
            .map(|i| list.link_free(arena, nth_block(i), MIN_BLOCK_WORDS))
            .collect();
        for node in &nodes {
            list.unlink(arena, node);
        }
        assert_eq!(list.iter(arena).count(), 0);
    });
}

#[test]
fn claim_sets_allocated() {
    with_list(|arena, list| {
        list.link_free(arena, nth_block(0), MIN_BLOCK_WORDS);
        let node = list.link_free(arena, nth_block(1), 2 * MIN_BLOCK_WORDS);

        let block = list.claim(arena, node);
        assert_eq!(block, nth_block(1));
        assert!(arena.is_allocated(block));
        assert_eq!(arena.size_words(block), 2 * MIN_BLOCK_WORDS);
        assert_eq!(arena.footer_tag(block), arena.header_tag(block));
        assert!(arena.as_free(block).is_none());

        let order: Vec<_> = list.iter(arena).collect();
        assert_eq!(order, [nth_block(0)]);
    });
}
