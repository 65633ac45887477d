//! This crate implements a dynamic memory allocator based on boundary tags
//! and an explicit free list.
//!
//!  - **One contiguous, growable heap.** Memory is obtained from
//!    a [`HeapSource`], which extends the heap at its end like `sbrk`. The
//!    heap never shrinks.
//!
//!  - **Boundary tags.** Every block carries its size and allocation state
//!    at both ends, so physically adjacent blocks can be found in constant
//!    time in either direction and freed blocks are merged with their free
//!    neighbors immediately.
//!
//!  - **Explicit free list.** Free blocks form a doubly-linked list threaded
//!    through their unused payloads, anchored by a sentinel in the heap's
//!    prologue block.
//!
//!  - **First fit.** Allocation picks the first free block in address order
//!    that is large enough, splitting off the remainder when it can stand as
//!    a block of its own.
//!
//!  - **This crate supports `#![no_std]`.** [`SliceSource`] serves a heap out
//!    of any memory pool. On Unix, [`MmapSource`] and [`GlobalHeap`] are
//!    available as well.
//!
//! # Examples
//!
//! ## `Heap`: Core API
//!
//! ```rust
//! use tagalloc::{Heap, SliceSource};
//! use std::mem::MaybeUninit;
//!
//! let mut pool = [MaybeUninit::uninit(); 65536];
//!
//! // The heap grows by 256 words at a time
//! let mut heap: Heap<_, 256> = Heap::new(SliceSource::new(&mut pool)).unwrap();
//!
//! unsafe {
//!     let mut ptr1 = heap.allocate(8).unwrap().cast::<u64>();
//!     let mut ptr2 = heap.allocate(8).unwrap().cast::<u64>();
//!     *ptr1.as_mut() = 42;
//!     *ptr2.as_mut() = 56;
//!     assert_eq!(*ptr1.as_ref(), 42);
//!     assert_eq!(*ptr2.as_ref(), 56);
//!
//!     let ptr2 = heap.resize(ptr2.cast(), 4096).unwrap().cast::<u64>();
//!     assert_eq!(*ptr2.as_ref(), 56);
//!
//!     heap.release(ptr1.cast());
//!     heap.release(ptr2.cast());
//! }
//!
//! // Everything was merged back into a single free block
//! assert_eq!(heap.free_blocks().count(), 1);
//! assert_eq!(heap.check(), Ok(()));
//! ```
//!
//! ## `GlobalHeap`: Global Allocator
//!
//! ```rust
//! #[cfg(unix)]
//! #[global_allocator]
//! static A: tagalloc::GlobalHeap = tagalloc::GlobalHeap::new();
//!
//! fn main() {
//!     let mut m = std::collections::HashMap::new();
//!     m.insert(1, 2);
//!     m.insert(5, 3);
//!     drop(m);
//! }
//! ```
//!
//! # Details
//!
//! ## Logging
//!
//! The heap reports its growth through the [`log`] facade at the `debug`
//! level and every allocation, deallocation, and reallocation at the `trace`
//! level. A memory source can turn this off with [`HeapSource::LOGGING`].
//! [`GlobalHeap`] always does.
//!
//! [`log`]: https://docs.rs/log
//!
#![no_std]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

mod codec;
mod free_list;
mod heap;
mod source;
mod utils;
pub use self::{
    codec::{GRANULARITY, MIN_BLOCK_SIZE, OVERHEAD},
    heap::{BlockInfo, Blocks, Corruption, FreeBlocks, Heap, DEFAULT_CHUNK_WORDS},
    source::*,
};

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod global;
        pub use self::global::*;
    }
}

#[cfg(any(test, feature = "std"))]
extern crate std;

#[cfg(test)]
mod tests;
