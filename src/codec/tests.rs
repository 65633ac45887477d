use super::*;

#[repr(align(64))]
struct Align<T>(T);

fn with_arena(len: usize, f: impl FnOnce(&mut Arena)) {
    let mut pool = Align([0usize; 64]);
    assert!(len <= core::mem::size_of_val(&pool.0));
    let base = NonNull::from(&mut pool.0).cast::<u8>();
    // Safety: `pool` outlives `arena` and is aligned to 64 bytes
    let mut arena = unsafe { Arena::new(base, len) };
    f(&mut arena);
}

#[test]
fn tag_encoding() {
    assert_eq!(encode(4, true), 9);
    assert_eq!(encode(4, false), 8);
    assert_eq!(encode(0, true), 1);

    for &size_words in &[0, 4, 6, 1024, usize::MAX >> 2 & !1] {
        for &allocated in &[false, true] {
            let tag = encode(size_words, allocated);
            assert_eq!(decode_size(tag), size_words);
            assert_eq!(decode_allocated(tag), allocated);
        }
    }
}

#[test]
fn write_block_mirrors_tags() {
    with_arena(32 * WORD, |arena| {
        let block = Block::from_offset(GRANULARITY);
        arena.write_block(block, 6, true);

        assert_eq!(arena.header_tag(block), encode(6, true));
        assert_eq!(arena.footer_tag(block), encode(6, true));
        assert_eq!(arena.footer(block), block.offset() + 6 * WORD - GRANULARITY);
        assert_eq!(arena.size_words(block), 6);
        assert_eq!(arena.size(block), 6 * WORD);
        assert!(arena.is_allocated(block));
    });
}

#[test]
fn neighbors() {
    with_arena(32 * WORD, |arena| {
        let first = Block::from_offset(GRANULARITY);
        arena.write_block(first, 4, true);
        let second = arena.next_block(first);
        assert_eq!(second.offset(), first.offset() + 4 * WORD);

        arena.write_block(second, 8, false);
        let third = arena.next_block(second);
        assert_eq!(third.offset(), second.offset() + 8 * WORD);
        arena.write_block(third, 4, true);

        assert_eq!(arena.prev_block(third), second);
        assert_eq!(arena.prev_block(second), first);
    });
}

#[test]
fn free_view_requires_clear_bit() {
    with_arena(32 * WORD, |arena| {
        let block = Block::from_offset(GRANULARITY);
        arena.write_block(block, 4, true);
        assert_eq!(arena.as_free(block), None);

        let node = arena.write_free_block(block, 4);
        assert_eq!(arena.as_free(block), Some(FreeBlock(block)));

        let other = FreeBlock(Block::from_offset(GRANULARITY * 5));
        arena.set_prev_free(&node, &other);
        arena.set_next_free(&node, &node);
        assert_eq!(arena.prev_free(&node), other);
        assert_eq!(arena.next_free(&node), node);
    });
}

#[test]
fn set_allocated_keeps_size() {
    with_arena(32 * WORD, |arena| {
        let block = Block::from_offset(GRANULARITY);
        arena.write_block(block, 10, false);

        arena.set_allocated(block, true);
        assert_eq!(arena.header_tag(block), encode(10, true));
        assert_eq!(arena.footer_tag(block), encode(10, true));

        arena.set_allocated(block, false);
        assert_eq!(arena.header_tag(block), encode(10, false));
        assert_eq!(arena.footer_tag(block), encode(10, false));
    });
}

#[test]
fn epilogue() {
    with_arena(8 * WORD, |arena| {
        let block = Block::from_offset(8 * WORD);
        arena.write_epilogue(block);
        assert_eq!(arena.size_words(block), 0);
        assert!(arena.is_allocated(block));
    });
}

#[test]
fn payload_round_trip() {
    with_arena(32 * WORD, |arena| {
        let block = Block::from_offset(GRANULARITY * 3);
        let ptr = arena.payload(block);
        assert_eq!(ptr.as_ptr() as usize % GRANULARITY, 0);
        assert_eq!(arena.block_of(ptr), block);
        assert_eq!(arena.end() as usize - ptr.as_ptr() as usize, 32 * WORD - block.offset());
    });
}

#[test]
fn copy_and_zero_payload() {
    with_arena(32 * WORD, |arena| {
        let src = Block::from_offset(GRANULARITY);
        arena.write_block(src, 6, true);
        let dst = arena.next_block(src);
        arena.write_block(dst, 6, true);

        unsafe { arena.payload(src).as_ptr().write_bytes(0x5a, 4 * WORD) };
        arena.copy_payload(src, dst, 3 * WORD);
        let dst_bytes = unsafe { core::slice::from_raw_parts(arena.payload(dst).as_ptr(), 4 * WORD) };
        assert!(dst_bytes[..3 * WORD].iter().all(|&b| b == 0x5a));
        assert!(dst_bytes[3 * WORD..].iter().all(|&b| b == 0));

        arena.zero_payload(src, 2 * WORD);
        let src_bytes = unsafe { core::slice::from_raw_parts(arena.payload(src).as_ptr(), 4 * WORD) };
        assert!(src_bytes[..2 * WORD].iter().all(|&b| b == 0));
        assert!(src_bytes[2 * WORD..].iter().all(|&b| b == 0x5a));

        // The boundary tags are untouched
        assert_eq!(arena.footer_tag(src), encode(6, true));
        assert_eq!(arena.header_tag(dst), encode(6, true));
    });
}
